fn main() {
    println!("cargo::rerun-if-env-changed=SUPERCHUNK_DENY_WARNINGS");
    println!("cargo::rustc-check-cfg=cfg(deny_warnings)");
    if std::env::var("SUPERCHUNK_DENY_WARNINGS").as_deref() == Ok("1") {
        println!("cargo::rustc-cfg=deny_warnings");
    }
}
