pub mod catalog;
pub mod observer;
pub mod pipeline;
pub mod raster;
pub mod storage;
