//! Shared fixtures for the integration suites.
use mockall::mock;

use std::io::{self, Write};

mock! {
    /// Stand-in for a file sink whose writes can be scripted to fail, for
    /// exercising the writer fault paths without touching the filesystem.
    pub File {}
    impl Write for File {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
        fn flush(&mut self) -> io::Result<()>;
    }
}
