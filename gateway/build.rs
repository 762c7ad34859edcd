use anyhow::Result;

fn main() -> Result<()> {
    let pkg_version = env("CARGO_PKG_VERSION")?;
    let Some(pkg_version) = pkg_version.to_str() else {
        anyhow::bail!("invalid CARGO_PKG_VERSION: {}", pkg_version.to_string_lossy())
    };

    let rustc_version = rustc_version::version()?;

    println!("cargo:rustc-env=GHAPP_GATEWAY_VERSION={pkg_version}");
    println!("cargo:rustc-env=GHAPP_GATEWAY_RUSTC_VERSION={rustc_version}");
    Ok(())
}

fn env(key: &str) -> Result<std::ffi::OsString> {
    println!("cargo:rerun-if-env-changed={key}");
    std::env::var_os(key).ok_or_else(|| anyhow::anyhow!("missing '{key}' environment variable"))
}
