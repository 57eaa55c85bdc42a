fn main() {
    // Build scripts see features as environment variables, not cfg flags.
    if std::env::var_os("CARGO_FEATURE_GRPC").is_some() {
        if std::env::var_os("PROTOC").is_none() {
            std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
        }
        tonic_build::configure()
            .build_client(false)
            .compile_protos(&["proto/mnemo/v1/memory.proto"], &["proto"])
            .unwrap_or_else(|e| panic!("failed to compile protos: {e}"));
    }
    println!("cargo:rerun-if-changed=proto/mnemo/v1/memory.proto");
}
