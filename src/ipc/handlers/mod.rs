pub mod core;
pub mod grades;
pub mod lessons;
pub mod navigation;
pub mod pages;
pub mod setup;
