use std::{
    io::{BufRead, BufReader},
    process::{Child, Command, Stdio},
};

#[allow(unused)]
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn build_command() -> Command {
    let mut cmd = match std::env::var_os("TEST_HELPER") {
        Some(binary) => Command::new(binary),
        None => Command::new(env!("CARGO_BIN_EXE_test")),
    };
    cmd.env("RUST_BACKTRACE", "1");
    cmd
}

fn start_child_and_wait_for_threads_helper(command: &str, num: usize) -> Child {
    let mut cmd = build_command();
    cmd.arg(command).arg(num.to_string());
    cmd.stdout(Stdio::piped());

    let mut child = cmd.spawn().expect("failed to spawn test helper");
    wait_for_threads(&mut child, num);
    child
}

#[allow(unused)]
pub fn start_child_and_wait_for_threads(num: usize) -> Child {
    start_child_and_wait_for_threads_helper("spawn_and_wait", num)
}

#[allow(unused)]
pub fn start_child_and_wait_for_named_threads(num: usize) -> Child {
    start_child_and_wait_for_threads_helper("spawn_name_wait", num)
}

#[allow(unused)]
pub fn wait_for_threads(child: &mut Child, num: usize) {
    let mut f = BufReader::new(child.stdout.as_mut().expect("Can't open stdout"));
    let mut lines = 0;
    while lines < num {
        let mut buf = String::new();
        match f.read_line(&mut buf) {
            Ok(0) => panic!("test helper exited early"),
            Ok(_) => {
                if buf == "1\n" {
                    lines += 1;
                }
            }
            Err(e) => {
                std::panic::panic_any(e);
            }
        }
    }
}

/// Starts a child that leaked a block of known bytes, returns the child with
/// the block's address and length
#[allow(unused)]
pub fn start_child_with_marker() -> (Child, u64, u64) {
    let mut cmd = build_command();
    cmd.arg("marker").stdout(Stdio::piped());
    let mut child = cmd.spawn().expect("failed to spawn test helper");

    let mut f = BufReader::new(child.stdout.as_mut().expect("Can't open stdout"));
    let mut location = String::new();
    f.read_line(&mut location).expect("no marker location");
    let mut ready = String::new();
    f.read_line(&mut ready).expect("marker child never became ready");
    assert_eq!(ready, "1\n");

    let (address, length) = location
        .trim()
        .split_once(' ')
        .expect("malformed marker location");
    let address = u64::from_str_radix(address.trim_start_matches("0x"), 16).unwrap();
    let length = length.parse().unwrap();
    drop(f);
    (child, address, length)
}

#[allow(unused)]
pub fn kill_child(mut child: Child) {
    child.kill().expect("Failed to kill process");
    child.wait().expect("Failed to wait on killed process");
}

/// Kills the child when dropped, so a failed assertion doesn't leak it
#[allow(unused)]
pub struct KillOnDrop(pub Child);

impl KillOnDrop {
    #[allow(unused)]
    pub fn id(&self) -> u32 {
        self.0.id()
    }
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Status line of a process, eg. the `State:` of `/proc/<pid>/status`
#[allow(unused)]
pub fn proc_status_field(pid: u32, field: &str) -> Option<String> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix(field)?.strip_prefix(':'))
        .map(|value| value.trim().to_owned())
}

#[allow(unused)]
pub fn read_minidump_soft_errors_or_panic<'a, T>(
    dump: &minidump::Minidump<'a, T>,
) -> serde_json::Value
where
    T: std::ops::Deref<Target = [u8]> + 'a,
{
    let contents = std::str::from_utf8(
        dump.get_raw_stream(minidump_common::format::MINIDUMP_STREAM_TYPE::MozSoftErrors.into())
            .expect("missing soft error stream"),
    )
    .expect("expected utf-8 stream");

    serde_json::from_str(contents).expect("expected json")
}

/// Asserts the soft error `group` holds at least one `variant` error
#[allow(unused)]
pub fn assert_soft_error_variant(soft_errors: &serde_json::Value, group: &str, variant: &str) {
    let groups = soft_errors.as_array().expect("soft errors are a list");
    let found = groups
        .iter()
        .filter_map(|g| g.get(group))
        .filter_map(|errors| errors.as_array())
        .flatten()
        .any(|error| error.get(variant).is_some());
    assert!(found, "no {variant} in {group}: {soft_errors:#}");
}
