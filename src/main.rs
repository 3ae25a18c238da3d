fn main() {
    if let Err(err) = ledger_lens::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
