pub mod helpers;
pub mod merkle;
pub mod scripted;
