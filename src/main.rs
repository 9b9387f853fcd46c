fn main() {
    let args = std::env::args();
    if let Err(err) = pgbak::run(args) {
        eprintln!("pgbak error: {err:#}");
        std::process::exit(1);
    }
}
