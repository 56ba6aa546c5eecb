//! Command implementations

pub mod changelog;

pub mod doctor;

pub mod prepare;

pub mod status;
