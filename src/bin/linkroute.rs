use std::process;

fn main() {
    if let Err(err) = linkroute::cli::run() {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}
