pub mod notice;
pub mod shell;

pub use notice::Notice;
pub use shell::{LoopConfig, ShellStatus, Theme, Volume};
