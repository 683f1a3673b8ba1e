//! Shared constants for test infrastructure

// Device versions
pub const DEVICE_VERSION_1_0_0: &str = "1.0.0";
pub const DEVICE_VERSION_1_5_0: &str = "1.5.0";
pub const DEVICE_VERSION_2_0_0: &str = "2.0.0";

// Config names
pub const CONFIG_FULL_2_0_0: &str = "Foo_Ver2.0.0";
pub const CONFIG_FULL_5_0_0: &str = "Foo_Ver5.0.0";
pub const CONFIG_INCREMENTAL_5_0_0: &str = "Foo_Incremental_Ver5.0.0";
pub const CONFIG_NO_VERSION: &str = "Foo_Release";

// Product model and the path segment it becomes
pub const PRODUCT_MODEL: &str = "X1";
pub const MODEL_SEGMENT: &str = "x1";

// Config endpoints, relative to the mock server
pub const INCREMENTAL_CONFIG_PATH: &str = "/update/x1/incremental/ota_config.json";
pub const FULL_CONFIG_PATH: &str = "/update/x1/full/ota_config.json";
pub const PACKAGE_PATH: &str = "/packages/foo.zip";

// Payload contents
pub const PAYLOAD_BYTES: &[u8] = b"payload-bytes-written-to-the-inactive-slot";
pub const PROPERTIES_CONTENT: &[u8] = b"FILE_HASH=abc123\nFILE_SIZE=42\nMETADATA_HASH=def456\n";
pub const METADATA_BYTES: &[u8] = b"metadata";
pub const CARE_MAP_BYTES: &[u8] = b"care map";
pub const COMPAT_ZIP_BYTES: &[u8] = b"PK\x03\x04compat";
pub const NOT_A_ZIP_BYTES: &[u8] = b"plain text";

pub const FIVE_BYTES: &[u8] = b"12345";
