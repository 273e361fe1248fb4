pub mod model;
pub mod overlay;
pub mod preprocess;
pub mod remote;
pub mod service;
