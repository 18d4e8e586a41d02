// Tracking core
pub mod import;
pub mod parts;
pub mod progression;

// Read models
pub mod queries;
pub mod reports;

// Administration
pub mod management;
pub mod users;

// Shared helpers
pub mod audit;
pub mod drawings;
pub mod notes;
pub mod seed;
