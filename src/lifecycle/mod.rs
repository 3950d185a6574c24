//! Process lifecycle helpers

mod shutdown;

pub use shutdown::on_shutdown;
