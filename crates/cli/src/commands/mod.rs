pub mod chips;
pub mod config_cmd;
pub mod serve;
