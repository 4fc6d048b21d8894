//! Compiles the gRPC service definitions under `proto/`.
//!
//! Uses the vendored `protoc` so no system protobuf install is needed.

fn main() {
    let protoc = protoc_bin_vendored::protoc_bin_path().expect("vendored protoc");

    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc);

    tonic_build::configure()
        .compile_protos_with_config(config, &["proto/usdt.proto", "proto/health.proto"], &["proto"])
        .expect("failed to compile protos");

    println!("cargo:rerun-if-changed=proto");
}
