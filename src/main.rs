fn main() {
    std::process::exit(advisory_print_lib::run());
}
