pub mod process;
pub mod process_dir;
pub mod show_conf;
