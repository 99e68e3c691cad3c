fn main() {
    if let Err(err) = studysync_lib::run() {
        eprintln!("studysync: {err:#}");
        std::process::exit(1);
    }
}
