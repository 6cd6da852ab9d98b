fn main() {
    // The ESP-IDF sysenv is only present for device builds; host builds
    // (tests, fuzzing) must not require the toolchain.
    if std::env::var("CARGO_FEATURE_ESPIDF").is_ok() {
        embuild::espidf::sysenv::output();
    }
}
