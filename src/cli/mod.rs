pub mod limits;
pub mod setup;
pub mod ui;
