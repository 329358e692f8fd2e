//! Query settings serialization.
//!
//! Servers at or above the strings-serialization revision receive every
//! setting as a `(name, is_important, string value)` triple and interpret
//! it themselves. Older servers need the binary form, which is only
//! possible for settings whose wire type is known; unknown names are
//! skipped with a warning, the way the reference drivers do.

use std::collections::HashMap;

use tracing::warn;

use crate::error::Result;
use crate::io::write::ClickHouseWrite;

/// Wire type of a setting on pre-string-serialization servers.
#[derive(Debug, Clone, Copy)]
enum SettingType {
    UInt64,
    Bool,
    String,
    Float,
}

/// The known-settings table for the binary serialization. Deliberately the
/// common subset; everything else requires a newer server.
fn setting_type(name: &str) -> Option<SettingType> {
    Some(match name {
        "max_block_size"
        | "max_insert_block_size"
        | "max_threads"
        | "max_execution_time"
        | "max_memory_usage"
        | "max_rows_to_read"
        | "max_bytes_to_read"
        | "max_result_rows"
        | "priority"
        | "lock_acquire_timeout"
        | "flatten_nested" => SettingType::UInt64,
        "use_uncompressed_cache"
        | "extremes"
        | "optimize_skip_unused_shards"
        | "insert_deduplicate"
        | "join_use_nulls"
        | "send_logs_level"
        | "allow_experimental_object_type" => SettingType::Bool,
        "totals_mode" | "log_comment" => SettingType::String,
        "totals_auto_threshold" => SettingType::Float,
        _ => return None,
    })
}

fn as_bool(value: &str) -> u64 {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => 1,
        _ => 0,
    }
}

/// Serialize the settings map, terminated by an empty string.
pub async fn write_settings(
    output: &mut (dyn ClickHouseWrite + '_),
    settings: &HashMap<String, String>,
    as_strings: bool,
    is_important: bool,
) -> Result<()> {
    for (name, value) in settings {
        if as_strings {
            output.write_string(name).await?;
            output.write_u8(u8::from(is_important)).await?;
            output.write_string(value).await?;
            continue;
        }

        // Binary serialization needs the type; skip settings we cannot
        // encode rather than corrupting the stream.
        let Some(setting_type) = setting_type(name) else {
            warn!(setting = %name, "unknown setting, skipping");
            continue;
        };
        output.write_string(name).await?;
        match setting_type {
            SettingType::UInt64 => {
                let parsed = value.parse::<u64>().unwrap_or_else(|_| as_bool(value));
                output.write_varint(parsed).await?;
            }
            SettingType::Bool => output.write_varint(as_bool(value)).await?,
            SettingType::String => output.write_string(value).await?,
            // Floats travel in string representation.
            SettingType::Float => output.write_string(value).await?,
        }
    }
    output.write_string("").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read::{ClickHouseRead, SliceReader};
    use crate::io::write::VecWriter;

    #[tokio::test]
    async fn string_serialization_writes_triples() {
        let mut settings = HashMap::new();
        settings.insert("max_threads".to_owned(), "4".to_owned());
        let mut out = VecWriter::new();
        write_settings(&mut out, &settings, true, true).await.unwrap();

        let mut input = SliceReader::new(out.into_inner());
        assert_eq!(input.read_string().await.unwrap(), "max_threads");
        assert_eq!(input.read_u8().await.unwrap(), 1);
        assert_eq!(input.read_string().await.unwrap(), "4");
        assert_eq!(input.read_string().await.unwrap(), "");
    }

    #[tokio::test]
    async fn binary_serialization_skips_unknown_names() {
        let mut settings = HashMap::new();
        settings.insert("no_such_setting".to_owned(), "1".to_owned());
        let mut out = VecWriter::new();
        write_settings(&mut out, &settings, false, false).await.unwrap();

        // Only the terminator.
        assert_eq!(out.as_slice(), &[0]);
    }

    #[tokio::test]
    async fn binary_serialization_encodes_known_types() {
        let mut settings = HashMap::new();
        settings.insert("max_block_size".to_owned(), "65536".to_owned());
        let mut out = VecWriter::new();
        write_settings(&mut out, &settings, false, false).await.unwrap();

        let mut input = SliceReader::new(out.into_inner());
        assert_eq!(input.read_string().await.unwrap(), "max_block_size");
        assert_eq!(input.read_varint().await.unwrap(), 65536);
        assert_eq!(input.read_string().await.unwrap(), "");
    }
}
