pub mod catalog;
pub mod job;
pub mod metadata;
pub mod params;
pub mod response;
pub mod submission;
