#![forbid(unsafe_code)]
pub fn main() {
    spscan_cli::run_cli();
}
