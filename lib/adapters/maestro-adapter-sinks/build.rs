fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    // SAFETY: build scripts are single-threaded at this point.
    unsafe {
        std::env::set_var("PROTOC", protoc);
    }
    println!("cargo:rerun-if-changed=proto/sinks.proto");
    tonic_build::configure()
        .build_server(false)
        .compile_protos(&["proto/sinks.proto"], &["proto"])?;
    Ok(())
}
