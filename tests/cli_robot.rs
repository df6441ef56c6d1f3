use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use clap::CommandFactory;
use dense_retriever::Cli;

const ANIMALS_JSON: &str = r#"{
  "A": {"title": "Cat", "text": "Cats are mammals."},
  "B": {"title": "Dog", "text": "Dogs are mammals."},
  "C": {"title": "Car", "text": "Cars have engines."}
}"#;

const ANIMALS_JSON_REORDERED: &str = r#"{
  "C": {"title": "Car", "text": "Cars have engines."},
  "A": {"title": "Cat", "text": "Cats are mammals."},
  "B": {"title": "Dog", "text": "Dogs are mammals."}
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = format!(
            "cache_dir = {:?}\nshow_progress = false\n",
            dir.path().join("cache").display().to_string()
        );
        fs::write(dir.path().join("retriever.toml"), config).unwrap();
        Self { dir }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("retriever.toml")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("retriever"));
        cmd.current_dir(self.dir.path());
        for key in [
            "RETRIEVER_CACHE_DIR",
            "RETRIEVER_BATCH_SIZE",
            "RETRIEVER_CHUNK_SIZE",
            "RETRIEVER_SCORE_FUNCTION",
            "RETRIEVER_EMBEDDER_DIM",
            "RETRIEVER_QUANTIZATION",
            "RUST_LOG",
        ] {
            cmd.env_remove(key);
        }
        cmd.env("NO_COLOR", "1");
        cmd.arg("--config").arg(self.config());
        cmd
    }
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().clone();
    serde_json::from_slice(&output.stdout).expect("valid json on stdout")
}

fn fingerprint_of(ws: &Workspace, corpus: &Path) -> String {
    let output = ws
        .cmd()
        .args(["fingerprint", "--corpus"])
        .arg(corpus)
        .assert()
        .success()
        .get_output()
        .clone();
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn help_lists_subcommands() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("search"))
        .stdout(contains("repl"))
        .stdout(contains("fingerprint"))
        .stdout(contains("cache"));
}

#[test]
fn fingerprint_is_insertion_order_independent() {
    let ws = Workspace::new();
    let a = ws.write("a.json", ANIMALS_JSON);
    let b = ws.write("b.json", ANIMALS_JSON_REORDERED);

    let fp_a = fingerprint_of(&ws, &a);
    assert_eq!(fp_a.len(), 64);
    assert!(fp_a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(fp_a, fingerprint_of(&ws, &b));
}

#[test]
fn search_json_then_cache_list() {
    let ws = Workspace::new();
    let corpus = ws.write("animals.json", ANIMALS_JSON);

    let json = stdout_json(
        ws.cmd()
            .args(["search", "--corpus"])
            .arg(&corpus)
            .args(["-q", "engines", "-q", "dogs", "--top-k", "2", "--sorted", "--json"]),
    );
    assert_eq!(json["score_function"], "cos_sim");
    assert_eq!(json["queries"]["q1"], "engines");
    let q1 = json["results"]["q1"].as_array().unwrap();
    assert_eq!(q1.len(), 2);
    assert_eq!(q1[0]["id"], "C");
    assert_eq!(json["results"]["q2"][0]["id"], "B");

    let listed = stdout_json(ws.cmd().args(["cache", "list", "--json"]));
    let entries = listed["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["fingerprint"], json["fingerprint"]);
    assert_eq!(listed["embedder"], "fnv1a-384");
}

#[test]
fn human_output_shows_titles() {
    let ws = Workspace::new();
    let corpus = ws.write("animals.json", ANIMALS_JSON);
    ws.cmd()
        .args(["search", "--corpus"])
        .arg(&corpus)
        .args(["--query", "engines", "--top-k", "1", "--score-function", "dot"])
        .assert()
        .success()
        .stdout(contains("Dot Product"))
        .stdout(contains("Car"));
}

#[test]
fn unknown_score_function_is_a_usage_error() {
    let ws = Workspace::new();
    let corpus = ws.write("animals.json", ANIMALS_JSON);
    ws.cmd()
        .args(["search", "--corpus"])
        .arg(&corpus)
        .args(["-q", "cat", "--score-function", "euclidean"])
        .assert()
        .code(2)
        .stderr(contains("must be either (cos_sim)"));
}

#[test]
fn missing_corpus_fails_with_context() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["search", "--corpus", "nope.json", "-q", "cat"])
        .assert()
        .failure()
        .stderr(contains("loading corpus"));
}

#[test]
fn missing_config_file_is_an_error() {
    let ws = Workspace::new();
    let corpus = ws.write("animals.json", ANIMALS_JSON);
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("retriever"));
    cmd.args(["--config", "/definitely/not/here.toml", "search", "--corpus"])
        .arg(&corpus)
        .args(["-q", "cat"])
        .assert()
        .failure()
        .stderr(contains("config file not found"));
}

#[test]
fn jsonl_corpus_with_ordinal_ids() {
    let ws = Workspace::new();
    let corpus = ws.write(
        "rows.jsonl",
        "{\"title\": \"Cat\", \"text\": \"Cats are mammals.\"}\n{\"title\": \"Car\", \"text\": \"Cars have engines.\"}\n",
    );
    let json = stdout_json(
        ws.cmd()
            .args(["search", "--corpus"])
            .arg(&corpus)
            .args(["-q", "engines", "--top-k", "1", "--json"]),
    );
    assert_eq!(json["results"]["q1"][0]["id"], "1");
}

#[test]
fn csv_corpus_uses_row_ordinal_ids() {
    let ws = Workspace::new();
    let corpus = ws.write(
        "corpus.csv",
        "title,text\nCat,Cats are mammals.\nDog,Dogs are mammals.\nCar,Cars have engines.\n",
    );
    let json = stdout_json(
        ws.cmd()
            .args(["search", "--corpus"])
            .arg(&corpus)
            .args(["-q", "engines", "--top-k", "1", "--json"]),
    );
    assert_eq!(json["results"]["q1"][0]["id"], "2");
}

#[test]
fn repl_answers_queries_from_stdin() {
    let ws = Workspace::new();
    let corpus = ws.write("animals.json", ANIMALS_JSON);
    ws.cmd()
        .args(["repl", "--corpus"])
        .arg(&corpus)
        .args(["--top-k", "1"])
        .write_stdin("show:A\nquery:engines\nexit\n")
        .assert()
        .success()
        .stdout(contains("3 documents loaded"))
        .stdout(contains("Cats are mammals."))
        .stdout(contains("C [").and(contains("Car")));
}

#[test]
fn completions_and_man_render() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(contains("retriever"));
    ws.cmd()
        .arg("man")
        .assert()
        .success()
        .stdout(contains(".TH"));
}

#[test]
fn verbose_logs_go_to_stderr() {
    let ws = Workspace::new();
    let corpus = ws.write("animals.json", ANIMALS_JSON);
    ws.cmd()
        .arg("-v")
        .args(["search", "--corpus"])
        .arg(&corpus)
        .args(["-q", "cat", "--json"])
        .assert()
        .success()
        .stderr(contains("loaded corpus"))
        .stdout(contains("\"results\"").and(contains("loaded corpus").not()));
}
