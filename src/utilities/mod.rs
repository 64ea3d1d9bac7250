//! Utility modules: filesystem access and console output.

pub mod fs;
pub mod printer;

pub use fs::{FileSystem, LocalFileSystem};
pub use printer::{ColoredText, Printer, PrinterColor};
