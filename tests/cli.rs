use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CORPUS: &str = "the quick brown fox jumps over the lazy dog. \
the dog sleeps while the fox runs; the quick fox wins again and again.\n";

fn temp_workspace() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn gptok(workspace: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gptok").expect("binary exists");
    cmd.current_dir(workspace).arg("--quiet");
    cmd
}

fn encode_json(workspace: &Path, model: &str, text: &str, policy: &str) -> Vec<u64> {
    let output = gptok(workspace)
        .args(["encode", "-m", model, "--json", "--allowed-special", policy, text])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let encoded: Value = serde_json::from_slice(&output).expect("encoded output is valid JSON");
    encoded["tokens"]
        .as_array()
        .expect("tokens array")
        .iter()
        .map(|v| v.as_u64().expect("u64 token"))
        .collect()
}

#[test]
fn train_encode_decode_round_trip() {
    let workspace = temp_workspace();
    fs::write(workspace.path().join("corpus.txt"), CORPUS.repeat(4)).expect("write corpus");

    gptok(workspace.path())
        .args([
            "train",
            "corpus.txt",
            "--vocab-size",
            "300",
            "--no-progress",
            "--special-token",
            "<|endoftext|>",
            "-o",
            "model.json",
        ])
        .assert()
        .success();
    assert!(workspace.path().join("model.json").exists(), "model.json was created");

    let text = "the quick fox<|endoftext|>sleeps";
    let tokens = encode_json(workspace.path(), "model.json", text, "all");
    assert!(tokens.len() < text.len(), "merges compress the text");

    let token_args = tokens.iter().map(ToString::to_string).collect::<Vec<_>>();
    let decoded = gptok(workspace.path())
        .args(["decode", "-m", "model.json"])
        .args(&token_args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(decoded).expect("utf-8"), text);

    let info = gptok(workspace.path())
        .args(["info", "-m", "model.json", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary: Value = serde_json::from_slice(&info).expect("info JSON");
    assert_eq!(summary["vocab_size"], 300);
    assert_eq!(summary["special_tokens"]["<|endoftext|>"], 300);
}

#[test]
fn recovered_model_matches_trained_model() {
    let workspace = temp_workspace();
    fs::write(workspace.path().join("corpus.txt"), CORPUS).expect("write corpus");

    gptok(workspace.path())
        .args([
            "train",
            "corpus.txt",
            "--vocab-size",
            "320",
            "--no-progress",
            "--export-ranks",
            "ranks.tiktoken",
            "-o",
            "trained.json",
        ])
        .assert()
        .success();
    gptok(workspace.path())
        .args(["recover", "ranks.tiktoken", "-o", "recovered.json"])
        .assert()
        .success();

    let text = "the lazy dog runs over the quick brown fox";
    assert_eq!(
        encode_json(workspace.path(), "trained.json", text, "all"),
        encode_json(workspace.path(), "recovered.json", text, "all")
    );
}

#[test]
fn disallowed_special_token_fails() {
    let workspace = temp_workspace();
    fs::write(workspace.path().join("corpus.txt"), CORPUS).expect("write corpus");
    gptok(workspace.path())
        .args([
            "train",
            "corpus.txt",
            "--vocab-size",
            "260",
            "--no-progress",
            "--special-token",
            "<|endoftext|>",
        ])
        .assert()
        .success();

    gptok(workspace.path())
        .args([
            "encode",
            "-m",
            "model.json",
            "--allowed-special",
            "none_raise",
            "a<|endoftext|>",
        ])
        .assert()
        .failure();
}

#[test]
fn rejects_vocab_below_byte_alphabet() {
    let workspace = temp_workspace();
    fs::write(workspace.path().join("corpus.txt"), CORPUS).expect("write corpus");
    gptok(workspace.path())
        .args(["train", "corpus.txt", "--vocab-size", "100", "--no-progress"])
        .assert()
        .failure();
}
