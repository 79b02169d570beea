//! Store Redirect
//!
//! Picks which runtime package the application store should show. The
//! choice depends on the host's word size, the device CPU family and on
//! whether the primary store is the default one (which serves ARM and IA
//! builds under the same package).

/// Store URI prefix for a package details page
pub const STORE_DETAILS_URI: &str = "market://details?id=";
/// Package id of the default store application
pub const DEFAULT_STORE_PACKAGE: &str = "com.android.vending";

pub const CORE_PACKAGE: &str = "org.runtime.core";
pub const CORE_IA_PACKAGE: &str = "org.runtime.core.ia";
pub const CORE64_PACKAGE: &str = "org.runtime.core64";
pub const CORE64_IA_PACKAGE: &str = "org.runtime.core64.ia";

/// Facts the decision table needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreContext {
    /// Package id of the first store that can handle the details URI
    pub primary_store: String,
    /// Primary CPU ABI of the device, e.g. `arm64-v8a`
    pub device_abi: String,
    /// ABI the host application was built for
    pub app_abi: String,
}

impl StoreContext {
    /// Context for the running process; the store is assumed to be the default one
    pub fn current() -> Self {
        let abi = current_abi().to_string();
        Self {
            primary_store: DEFAULT_STORE_PACKAGE.to_string(),
            device_abi: abi.clone(),
            app_abi: abi,
        }
    }

    fn is_default_store(&self) -> bool {
        self.primary_store == DEFAULT_STORE_PACKAGE
    }

    fn is_arm_device(&self) -> bool {
        self.device_abi.eq_ignore_ascii_case("armeabi-v7a")
            || self.device_abi.eq_ignore_ascii_case("arm64-v8a")
    }

    fn is_32bit_app(&self) -> bool {
        self.app_abi.eq_ignore_ascii_case("x86") || self.app_abi.eq_ignore_ascii_case("armeabi-v7a")
    }
}

/// Package to open in the store
pub fn select_package(ctx: &StoreContext) -> &'static str {
    let shared_listing = ctx.is_default_store() || ctx.is_arm_device();
    match (ctx.is_32bit_app(), shared_listing) {
        (true, true) => CORE_PACKAGE,
        (true, false) => CORE_IA_PACKAGE,
        (false, true) => CORE64_PACKAGE,
        (false, false) => CORE64_IA_PACKAGE,
    }
}

/// Store details URI for `package`
pub fn details_uri(package: &str) -> String {
    format!("{}{}", STORE_DETAILS_URI, package)
}

/// ABI name of the running build, in store vocabulary
pub fn current_abi() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "x86",
        "x86_64" => "x86_64",
        "arm" => "armeabi-v7a",
        "aarch64" => "arm64-v8a",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(store: &str, device: &str, app: &str) -> StoreContext {
        StoreContext {
            primary_store: store.to_string(),
            device_abi: device.to_string(),
            app_abi: app.to_string(),
        }
    }

    #[test]
    fn test_default_store_uses_shared_listing() {
        assert_eq!(select_package(&ctx(DEFAULT_STORE_PACKAGE, "x86", "x86")), CORE_PACKAGE);
        assert_eq!(
            select_package(&ctx(DEFAULT_STORE_PACKAGE, "x86_64", "x86_64")),
            CORE64_PACKAGE
        );
    }

    #[test]
    fn test_other_store_on_ia_device() {
        assert_eq!(select_package(&ctx("com.other.store", "x86", "x86")), CORE_IA_PACKAGE);
        assert_eq!(
            select_package(&ctx("com.other.store", "x86_64", "x86_64")),
            CORE64_IA_PACKAGE
        );
    }

    #[test]
    fn test_other_store_on_arm_device() {
        assert_eq!(
            select_package(&ctx("com.other.store", "ARMEABI-V7A", "armeabi-v7a")),
            CORE_PACKAGE
        );
        assert_eq!(
            select_package(&ctx("com.other.store", "arm64-v8a", "arm64-v8a")),
            CORE64_PACKAGE
        );
    }

    #[test]
    fn test_details_uri() {
        assert_eq!(details_uri(CORE_PACKAGE), "market://details?id=org.runtime.core");
    }
}
