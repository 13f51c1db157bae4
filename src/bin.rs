use alice_harness::frontend::cli;

pub fn main() {
    cli::main();
}
