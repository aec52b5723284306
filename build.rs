fn main() {
    // This allow using #[cfg(mysql)] instead of #[cfg(feature = "mysql")], which helps when trying to add them through macros
    println!("cargo:rustc-check-cfg=cfg(mysql)");
    println!("cargo:rustc-check-cfg=cfg(postgresql)");
    #[cfg(feature = "mysql")]
    println!("cargo:rustc-cfg=mysql");
    #[cfg(feature = "postgresql")]
    println!("cargo:rustc-cfg=postgresql");

    #[cfg(not(any(feature = "mysql", feature = "postgresql")))]
    compile_error!("You need to enable one DB backend. To build with MySQL do: cargo build --features mysql");
}
