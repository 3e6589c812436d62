//! Integration tests for the tagwalk binary

use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

fn tagwalk() -> Command {
    Command::cargo_bin("tagwalk").unwrap()
}

fn sample_gif() -> Vec<u8> {
    let mut data = b"GIF89a".to_vec();
    data.extend_from_slice(&[1, 0, 1, 0, 0x80, 0, 0]);
    data.extend_from_slice(&[0, 0, 0, 0xFF, 0xFF, 0xFF]);
    data.extend_from_slice(&[0x21, 0xFE, 0x02, b'o', b'k', 0x00]);
    data.extend_from_slice(&[0x2C, 0, 0, 0, 0, 1, 0, 1, 0, 0x00]);
    data.extend_from_slice(&[0x02, 0x02, 0x44, 0x01, 0x00]);
    data.push(0x3B);
    data
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_formats_lists_builtins() {
    let out = stdout_of(tagwalk().arg("formats"));
    assert!(out.contains("gif"));
    assert!(out.contains("bmp"));
}

#[test]
fn test_check_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("image.gif");
    fs::write(&path, sample_gif()).unwrap();

    let out = stdout_of(tagwalk().arg("check").arg(&path));
    assert!(out.contains("round-trips"));
}

#[test]
fn test_check_reports_truncated_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.gif");
    let data = sample_gif();
    fs::write(&path, &data[..20]).unwrap();

    let output = tagwalk().arg("check").arg(&path).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_dump_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("image.gif");
    fs::write(&path, sample_gif()).unwrap();

    let out = stdout_of(tagwalk().args(["dump", "--json"]).arg(&path));
    let tree: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(tree["gif_header"]["signature"], "GIF");
    assert_eq!(tree["gif_logical_screen"]["global_color_table"], "000000ffffff");
    assert_eq!(tree["data_blocks"].as_array().unwrap().len(), 2);
    assert_eq!(tree["trailer"], 59);
}

#[test]
fn test_dump_text_hides_hidden_fields() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("image.dat");
    fs::write(&path, sample_gif()).unwrap();

    let out = stdout_of(tagwalk().args(["dump", "--format", "gif"]).arg(&path));
    assert!(out.contains("comment_extension"));
    assert!(out.contains("label = 254 (comment_extension)"));
    assert!(!out.contains("trailer"));

    let out = stdout_of(tagwalk().args(["dump", "--all", "--format", "gif"]).arg(&path));
    assert!(out.contains("trailer = 59"));
}

#[test]
fn test_unknown_extension_needs_format() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("image.dat");
    fs::write(&path, sample_gif()).unwrap();

    let output = tagwalk().arg("dump").arg(&path).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_new_then_check() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blank.bmp");

    stdout_of(tagwalk().args(["new", "--format", "bmp"]).arg(&path));
    assert_eq!(fs::read(&path).unwrap().len(), 14 + 124);

    let out = stdout_of(tagwalk().arg("check").arg(&path));
    assert!(out.contains("138 bytes"));
}
