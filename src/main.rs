fn main() {
    if let Err(e) = peerlink_lib::run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
