//! JSON model files: the merge list, an optional byte remap, and the tokenizer settings.
//!
//! ```text
//! {
//!   "version": 1,
//!   "config": { "split_pattern": "gpt4", "special_tokens": {...}, "compatibility_mode": false },
//!   "merges": [[97, 97, 256], [256, 97, 257]],
//!   "byte_remap": null
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::TokenizerConfig;
use crate::error::{GptokError, Result};
use crate::model::{BpeModel, MergeTable, TokenId, BYTE_ALPHABET};
use crate::recovery::ByteRemap;

/// Version written into every model file.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    version: u32,
    config: TokenizerConfig,
    merges: Vec<[TokenId; 3]>,
    byte_remap: Option<Vec<u8>>,
}

/// Serialises `model` and `config` to a JSON string.
pub fn model_json(model: &BpeModel, config: &TokenizerConfig, pretty: bool) -> Result<String> {
    let file = ModelFile {
        version: FORMAT_VERSION,
        config: config.clone(),
        merges: model
            .merges()
            .entries()
            .iter()
            .map(|&((left, right), id)| [left, right, id])
            .collect(),
        byte_remap: model
            .byte_remap()
            .map(|remap| remap.forward_table().to_vec()),
    };
    let text = if pretty {
        serde_json::to_string_pretty(&file)?
    } else {
        serde_json::to_string(&file)?
    };
    Ok(text)
}

/// Parses a JSON model, re-validating the merge table and byte remap.
pub fn parse_model(text: &str) -> Result<(BpeModel, TokenizerConfig)> {
    let file: ModelFile = serde_json::from_str(text)?;
    if file.version != FORMAT_VERSION {
        return Err(GptokError::Serialization(format!(
            "unsupported model version {} (expected {FORMAT_VERSION})",
            file.version
        )));
    }
    let merges = MergeTable::from_entries(
        file.merges
            .iter()
            .map(|&[left, right, id]| ((left, right), id)),
    )
    .map_err(|err| GptokError::Serialization(format!("invalid merge list: {err}")))?;
    let mut model = BpeModel::new(merges);
    if let Some(table) = file.byte_remap {
        let forward: [u8; BYTE_ALPHABET] = table.try_into().map_err(|table: Vec<u8>| {
            GptokError::Serialization(format!(
                "byte remap must have {BYTE_ALPHABET} entries, found {}",
                table.len()
            ))
        })?;
        let remap = ByteRemap::from_forward(forward)
            .map_err(|err| GptokError::Serialization(format!("invalid byte remap: {err}")))?;
        model = model.with_byte_remap(remap);
    }
    Ok((model, file.config))
}

/// Writes the model file to `path`.
pub fn save_model<P: AsRef<Path>>(
    model: &BpeModel,
    config: &TokenizerConfig,
    path: P,
    pretty: bool,
) -> Result<()> {
    let path = path.as_ref();
    let text = model_json(model, config, pretty)?;
    fs::write(path, text).map_err(|err| GptokError::io(err, Some(path.to_path_buf())))
}

/// Reads a model file written by [`save_model`].
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<(BpeModel, TokenizerConfig)> {
    let path = path.as_ref();
    let text =
        fs::read_to_string(path).map_err(|err| GptokError::io(err, Some(path.to_path_buf())))?;
    parse_model(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranks::RankTable;
    use crate::recovery::build_from_external_vocab;
    use crate::split::SplitPattern;
    use tempfile::tempdir;

    #[test]
    fn saved_model_loads_back() {
        let model = BpeModel::from_merges([((97, 97), 256), ((256, 98), 257)]).unwrap();
        let config = TokenizerConfig::builder()
            .split_pattern(SplitPattern::Gpt2)
            .special_token("<|endoftext|>", 1000)
            .build()
            .unwrap();
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("model.json");
        save_model(&model, &config, &path, true).expect("save");
        let (loaded, loaded_config) = load_model(&path).expect("load");
        assert_eq!(loaded, model);
        assert_eq!(loaded_config, config);
    }

    #[test]
    fn byte_remap_is_persisted() {
        let mut table =
            RankTable::from_entries((0..=u8::MAX).map(|b| (vec![b], 255 - TokenId::from(b))));
        table.insert(b"xy".to_vec(), 256);
        let model = build_from_external_vocab(&table).unwrap();
        let text = model_json(&model, &TokenizerConfig::default(), false).unwrap();
        let (loaded, _) = parse_model(&text).unwrap();
        assert_eq!(loaded.byte_remap(), model.byte_remap());
        assert_eq!(loaded.merges(), model.merges());
    }

    #[test]
    fn rejects_invalid_merges_and_versions() {
        let bad_merge = r#"{"version":1,"config":{"split_pattern":"gpt4","special_tokens":{},"compatibility_mode":false},"merges":[[300,1,256]],"byte_remap":null}"#;
        assert!(matches!(
            parse_model(bad_merge),
            Err(GptokError::Serialization(message)) if message.contains("merge")
        ));
        let bad_version = bad_merge.replace("\"version\":1", "\"version\":9");
        assert!(parse_model(&bad_version).is_err());
        let short_remap = r#"{"version":1,"config":{"split_pattern":"gpt4","special_tokens":{},"compatibility_mode":false},"merges":[],"byte_remap":[0,1]}"#;
        assert!(parse_model(short_remap).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempdir().expect("tempdir");
        let err = load_model(dir.path().join("absent.json")).expect_err("missing");
        assert!(matches!(err, GptokError::Io { path: Some(_), .. }));
    }
}
