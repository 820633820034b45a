//! Command line usage errors. None of these reach a mutating code path.

use assert_cmd::Command;
use predicates::prelude::*;

fn weave() -> Command {
    let mut cmd = Command::cargo_bin("weave").unwrap();
    cmd.env_remove("WEAVE_MTU").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_every_verb() {
    weave()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("setup")
                .and(predicate::str::contains("launch"))
                .and(predicate::str::contains("helper"))
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("version")),
        );
}

#[test]
fn missing_verb_is_a_usage_error() {
    weave().assert().failure().code(2);
}

#[test]
fn unknown_verb_is_a_usage_error() {
    weave()
        .arg("teardown")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn helper_with_one_argument_is_a_usage_error() {
    weave()
        .args(["helper", "eth0"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("<ROUTE>"));
}

#[test]
fn helper_rejects_malformed_route() {
    weave()
        .args(["helper", "eth0", "10.2.0.0/40"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid value '10.2.0.0/40'"));
}

#[test]
fn setup_takes_no_arguments() {
    weave().args(["setup", "extra"]).assert().failure().code(2);
}

#[test]
fn non_numeric_mtu_is_a_usage_error() {
    weave()
        .args(["--mtu", "big", "setup"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn status_against_closed_port_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    weave()
        .args(["status", "--http-port", &port.to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to fetch router status"));
}
