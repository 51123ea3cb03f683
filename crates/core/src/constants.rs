/// Constants used throughout the capbridge codebase
// Rendezvous surface
pub const BRIDGE_SERVICE_NAME: &str = "activity";
pub const BRIDGE_SERVICE_DESCRIPTOR: &str = "android.app.IActivityManager";
pub const BRIDGE_TAG: &str = "_CBR";

// Broker handle
pub const BROKER_DESCRIPTOR: &str = "moe.shizuku.server.IShizukuService";

// Privileged operation codes on the broker handle
pub const OP_GET_APPLICATIONS: u32 = 10001;
pub const OP_REQUEST_PINNED_SHORTCUT: u32 = 10005;
pub const OP_BATCH_UPDATE_UNCONFIGURED: u32 = 10006;
pub const OP_GET_GLOBAL_SETTINGS: u32 = 10007;
pub const OP_SET_GLOBAL_SETTINGS: u32 = 10008;

// Permission flag bits
pub const FLAG_ALLOWED: u32 = 1 << 1;
pub const FLAG_DENIED: u32 = 1 << 2;
pub const FLAG_HIDDEN: u32 = 1 << 3;
pub const MASK_PERMISSION: u32 = FLAG_ALLOWED | FLAG_DENIED;
pub const MASK_ALL: u32 = u32::MAX;

// Persistence
pub const DEFAULT_DATABASE_PATH: &str = "/data/adb/capbridge/capbridge.db";
pub const UID_TABLE: &str = "uid_flags";

// Escalation
/// Restart command argument replaced by the host service chosen at escalation time.
pub const RESTART_TARGET_PLACEHOLDER: &str = "{host}";
pub const DEFAULT_RESTART_COMMAND: &[&str] =
    &["setprop", "ctl.restart", RESTART_TARGET_PLACEHOLDER];
pub const RESTART_TARGET_PRIMARY: &str = "zygote";
/// Restarted instead of the primary on devices running both 64-bit and 32-bit hosts.
pub const RESTART_TARGET_SECONDARY: &str = "zygote_secondary";
pub const ABI_LIST_64_PROPERTY: &str = "ro.product.cpu.abilist64";
pub const ABI_LIST_32_PROPERTY: &str = "ro.product.cpu.abilist32";

// Environment variable names
pub const CAPBRIDGE_CONFIG_VAR: &str = "CAPBRIDGE_CONFIG";
pub const CAPBRIDGE_DB_PATH_VAR: &str = "CAPBRIDGE_DB_PATH";
pub const CAPBRIDGE_SURFACE_VAR: &str = "CAPBRIDGE_SURFACE";
pub const CAPBRIDGE_MANAGER_UIDS_VAR: &str = "CAPBRIDGE_MANAGER_UIDS";
pub const CAPBRIDGE_LOG_VAR: &str = "CAPBRIDGE_LOG";
