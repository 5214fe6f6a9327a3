fn main() {
    // With the audio feature, libopus_sys builds opus statically; make sure the
    // final binaries can find the archive it produced.
    #[cfg(feature = "audio")]
    {
        // OUT_DIR is target/{profile}/build/zerocall-{hash}/out; the opus build
        // lives next to it in target/{profile}/build/libopus_sys-{hash}/out/lib
        let build_dir = std::env::var("OUT_DIR").ok().and_then(|out_dir| {
            std::path::Path::new(&out_dir)
                .parent()
                .and_then(|p| p.parent())
                .map(|p| p.to_path_buf())
        });

        if let Some(entries) = build_dir.and_then(|dir| std::fs::read_dir(dir).ok()) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if !name.to_string_lossy().starts_with("libopus_sys-") {
                    continue;
                }
                let opus_lib_dir = entry.path().join("out").join("lib");
                if opus_lib_dir.exists() {
                    println!("cargo:rustc-link-search=native={}", opus_lib_dir.display());
                    println!("cargo:rustc-link-lib=static=opus");
                    println!("cargo:rerun-if-changed={}", opus_lib_dir.display());
                    return;
                }
            }
        }

        // Fallback: links metadata exported by the -sys crate
        if let Ok(lib_path) = std::env::var("DEP_OPUS_LIB_DIR") {
            println!("cargo:rustc-link-search=native={}", lib_path);
            println!("cargo:rustc-link-lib=static=opus");
        }
    }
}
