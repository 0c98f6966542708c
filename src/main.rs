fn main() {
    std::process::exit(mediaq_lib::run())
}
