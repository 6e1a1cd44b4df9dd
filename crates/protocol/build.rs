fn main() {
    println!("cargo:rerun-if-changed=../../proto/rtc.proto");
    prost_build::Config::new()
        .compile_protos(&["../../proto/rtc.proto"], &["../../proto"])
        .expect("failed to compile rtc.proto");
}
