fn main() {
    if let Err(err) = stepfuse_lib::run() {
        eprintln!("stepfuse: {err:#}");
        std::process::exit(1);
    }
}
