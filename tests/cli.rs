use std::process::Command;

use assert_fs::prelude::*;
use predicates::prelude::*;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rbs-activesupport"))
}

fn project() -> assert_fs::TempDir {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("app/models/user.rb")
        .write_str(
            r#"class User
  include Auditable

  delegate :upcase, to: :name
  class_attribute :default_role, instance_writer: false

  private

  mattr_writer :registry
end
"#,
        )
        .unwrap();
    temp.child("app/models/concerns/auditable.rb")
        .write_str(
            r#"module Auditable
  extend ActiveSupport::Concern

  class_methods do
    def audited?
      true
    end
  end
end
"#,
        )
        .unwrap();
    temp.child("sig/user.rbs")
        .write_str("class User\n  def name: () -> String\nend\n")
        .unwrap();
    temp
}

#[test]
fn generate_writes_signature_files() {
    let temp = project();

    let status = bin().arg("generate").current_dir(temp.path()).status().unwrap();
    assert!(status.success());

    let user = temp.child("sig/activesupport/app/models/user.rbs");
    user.assert(predicate::path::is_file());

    let content = std::fs::read_to_string(user.path()).unwrap();
    assert!(predicate::str::starts_with("# resolve-type-names: false\n").eval(&content));
    assert!(predicate::str::contains("class User < ::Object\n").eval(&content));
    assert!(predicate::str::contains("  include ::Auditable\n  extend ::Auditable::ClassMethods\n").eval(&content));
    assert!(predicate::str::contains("  def upcase: () -> ::String\n").eval(&content));
    assert!(predicate::str::contains("  def default_role?: () -> bool\n").eval(&content));
    assert!(predicate::str::contains("  def default_role=:").not().eval(&content));
    assert!(predicate::str::contains(
        "  private\n\n  def self.registry=: (untyped) -> untyped\n  def registry=: (untyped) -> untyped\nend\n"
    )
    .eval(&content));

    temp.child("sig/activesupport/app/models/concerns/auditable.rbs")
        .assert(predicate::path::missing());
}

#[test]
fn check_fails_until_signatures_are_generated() {
    let temp = project();

    let status = bin()
        .args(["generate", "--check"])
        .current_dir(temp.path())
        .status()
        .unwrap();
    assert!(!status.success());
    temp.child("sig/activesupport").assert(predicate::path::missing());

    let status = bin().arg("generate").current_dir(temp.path()).status().unwrap();
    assert!(status.success());

    let status = bin()
        .args(["generate", "--check"])
        .current_dir(temp.path())
        .status()
        .unwrap();
    assert!(status.success());
}

#[test]
fn show_prints_signatures() {
    let temp = project();

    let output = bin()
        .args(["show", "app/models/user.rb"])
        .current_dir(temp.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(predicate::str::contains("def self.default_role: () -> untyped").eval(&stdout));
    assert!(predicate::str::contains("def upcase: () -> ::String").eval(&stdout));
    assert!(predicate::str::contains("  include ::Auditable\n  extend ::Auditable::ClassMethods\n").eval(&stdout));
}

#[test]
fn show_matches_generated_file() {
    let temp = project();

    let status = bin().arg("generate").current_dir(temp.path()).status().unwrap();
    assert!(status.success());
    let generated = std::fs::read_to_string(temp.child("sig/activesupport/app/models/user.rbs").path()).unwrap();

    let output = bin()
        .args(["show", "app/models/user.rb"])
        .current_dir(temp.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap(), generated);
}

#[test]
fn malformed_signature_files_do_not_stop_generation() {
    let temp = project();
    temp.child("sig/other.rbs").write_str("class Other end\n").unwrap();
    temp.child("sig/broken.rbs").write_str("class Broken\n").unwrap();

    let status = bin().arg("generate").current_dir(temp.path()).status().unwrap();
    assert!(status.success());
    temp.child("sig/activesupport/app/models/user.rbs")
        .assert(predicate::str::contains("def upcase: () -> ::String"));
}

#[test]
fn inspect_emits_json() {
    let temp = project();

    let output = bin()
        .args(["inspect", "app/models/user.rb", "--json"])
        .current_dir(temp.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["content_hash"].is_string());
    assert_eq!(json["definitions"][0]["name"], "::User");
}

#[test]
fn init_writes_config_file() {
    let temp = assert_fs::TempDir::new().unwrap();

    let status = bin().arg("init").current_dir(temp.path()).status().unwrap();
    assert!(status.success());
    temp.child("RbsActivesupport.toml")
        .assert(predicate::str::contains("[project]"))
        .assert(predicate::str::contains("output_dir = \"sig/activesupport\""));

    let status = bin().arg("init").current_dir(temp.path()).status().unwrap();
    assert!(!status.success());
}

#[test]
fn missing_config_file_is_an_error() {
    let temp = assert_fs::TempDir::new().unwrap();

    let status = bin()
        .args(["--config", "missing.toml", "generate"])
        .current_dir(temp.path())
        .status()
        .unwrap();
    assert!(!status.success());
}
