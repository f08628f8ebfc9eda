//! Integration tests for mounttab

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::thread;
    use tempfile::TempDir;

    const FSTAB: &str = "\
# /etc/fstab
LABEL=root / ext4 noatime,defaults 1 1
UUID=4b6d2c1e-7a7f-4d1b-9a4e-0d6d3c8f2a11 /boot vfat umask=0077 0 2
/dev/sda3 /home xfs rw,nosuid 0 2
/dev/sda4 swap swap defaults 0 0
server:/export /mnt/nfs nfs ro,soft 0 0
tmpfs /tmp tmpfs mode=1777 0 0
";

    const MOUNTINFO: &str = "\
17 12 8:1 / / rw,relatime - ext4 /dev/sda1 rw,errors=continue
15 17 0:3 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw
16 17 0:15 / /sys rw,nosuid,nodev,noexec,relatime - sysfs sysfs rw
20 17 8:3 / /home rw,relatime - xfs /dev/sda3 rw
21 20 0:25 / /home/user/cache rw - tmpfs tmpfs rw,size=1024k
";

    /// Scratch directory holding table fixtures and an empty config
    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("fstab"), FSTAB).unwrap();
            fs::write(dir.path().join("mountinfo"), MOUNTINFO).unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("mounttab");
            cmd.env("MOUNTTAB_CONFIG", self.path("config.toml"));
            cmd
        }

        fn arg(&self, name: &str) -> String {
            self.path(name).display().to_string()
        }
    }

    fn counter(path: &Path) -> u64 {
        fs::read_to_string(path).unwrap().trim().parse().unwrap()
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("mounttab")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("inspect fstab, mtab and mountinfo"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("mounttab")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("mounttab"));
    }

    #[test]
    fn list_fstab_table() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["list", "-f", &fx.arg("fstab")])
            .assert()
            .success()
            .stdout(predicate::str::contains("SOURCE"))
            .stdout(predicate::str::contains("/mnt/nfs"))
            .stdout(predicate::str::contains("LABEL=root"));
    }

    #[test]
    fn list_fstab_json() {
        let fx = Fixture::new();
        let output = fx
            .cmd()
            .args(["list", "-f", &fx.arg("fstab"), "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let entries = entries.as_array().unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[2]["target"], "/home");
        assert_eq!(entries[2]["fstype"], "xfs");
    }

    #[test]
    fn list_plain_is_fstab() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["list", "-f", &fx.arg("fstab"), "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/dev/sda3 /home xfs"))
            .stdout(predicate::str::contains("# /etc/fstab").not());
    }

    #[test]
    fn list_filters_by_type() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["list", "-f", &fx.arg("fstab"), "-t", "nonfs,swap", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/home"))
            .stdout(predicate::str::contains("/mnt/nfs").not())
            .stdout(predicate::str::contains("swap").not());
    }

    #[test]
    fn list_filters_by_options() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["list", "-f", &fx.arg("fstab"), "-O", "ro", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/mnt/nfs"))
            .stdout(predicate::str::contains("/home").not());
    }

    #[test]
    fn list_mountinfo_tree() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["list", "-f", &fx.arg("mountinfo"), "--tree"])
            .assert()
            .success()
            .stdout(predicate::str::contains("  /home"))
            .stdout(predicate::str::contains("    /home/user/cache"));
    }

    #[test]
    fn list_tree_with_rootfs_parent_of_itself() {
        let fx = Fixture::new();
        fs::write(
            fx.path("rootfs"),
            "1 1 0:1 / / rw - rootfs rootfs rw\n17 1 8:1 / /home rw - ext4 /dev/sda1 rw\n",
        )
        .unwrap();

        fx.cmd()
            .args(["list", "-f", &fx.arg("rootfs"), "--tree"])
            .assert()
            .success()
            .stdout(predicate::str::contains("  /home"));
    }

    #[test]
    fn list_missing_file_fails() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["list", "-f", &fx.arg("nope")])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn find_by_target() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["find", "-f", &fx.arg("fstab"), "-T", "/home/", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/dev/sda3 /home xfs"));
    }

    #[test]
    fn find_by_tag() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["find", "-f", &fx.arg("fstab"), "-S", "LABEL=root", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("LABEL=root / ext4"));
    }

    #[test]
    fn find_by_pair() {
        let fx = Fixture::new();
        fx.cmd()
            .args([
                "find",
                "-f",
                &fx.arg("fstab"),
                "-S",
                "server:/export",
                "-T",
                "/mnt/nfs",
                "--format",
                "json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"fstype\": \"nfs\""));
    }

    #[test]
    fn find_nothing_exits_one() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["find", "-f", &fx.arg("fstab"), "-T", "/srv"])
            .assert()
            .code(1)
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn strict_parser_rejects_garbage() {
        let fx = Fixture::new();
        fs::write(fx.path("broken"), "/dev/sda1\n/dev/sdb1 /data ext4 defaults 0 0\n").unwrap();

        fx.cmd()
            .args(["list", "-f", &fx.arg("broken"), "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/data"));

        fs::write(fx.path("config.toml"), "[parser]\nstrict = true\n").unwrap();
        fx.cmd()
            .args(["list", "-f", &fx.arg("broken")])
            .assert()
            .failure()
            .stderr(predicate::str::contains("parse error"));
    }

    #[test]
    fn config_path() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_and_show() {
        let fx = Fixture::new();
        fx.cmd().args(["config", "init"]).assert().success();
        assert!(fx.path("config.toml").exists());

        fx.cmd()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));

        fx.cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[lock]"))
            .stdout(predicate::str::contains("timeout_secs = 30"));
    }

    #[test]
    fn env_fstab_wins_over_config() {
        let fx = Fixture::new();
        fs::write(fx.path("config.toml"), "[paths]\nfstab = \"/nonexistent/fstab\"\n").unwrap();

        fx.cmd()
            .env("MOUNTTAB_FSTAB", fx.path("fstab"))
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/dev/sda3 /home xfs"));
    }

    #[test]
    fn zero_retry_delay_is_rejected() {
        let fx = Fixture::new();
        fs::write(fx.path("config.toml"), "[lock]\nretry_delay_ms = 0\n").unwrap();

        fx.cmd()
            .args(["list", "-f", &fx.arg("fstab")])
            .assert()
            .failure()
            .stderr(predicate::str::contains("retry_delay_ms"));
    }

    #[test]
    fn lock_counts_across_processes() {
        let fx = Fixture::new();
        let data = fx.path("data");
        let workers = 4;
        let rounds = 25;

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let mut cmd = fx.cmd();
                cmd.args(["lock", "-n", &rounds.to_string(), "--timeout", "30"])
                    .arg(&data);
                thread::spawn(move || {
                    cmd.assert().success();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter(&data), workers * rounds);
        assert!(!fx.path("data~").exists());
    }

    #[test]
    fn simple_lock_counts_across_processes() {
        let fx = Fixture::new();
        let data = fx.path("data");

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let mut cmd = fx.cmd();
                cmd.args(["lock", "--simple", "-n", "10"]).arg(&data);
                thread::spawn(move || {
                    cmd.assert().success();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter(&data), 30);
    }

    #[test]
    fn lock_times_out_on_stale_lockfile() {
        let fx = Fixture::new();
        let data = fx.path("data");
        fs::write(fx.path("data~"), "").unwrap();

        fx.cmd()
            .args(["lock", "--timeout", "1"])
            .arg(&data)
            .assert()
            .failure()
            .stderr(predicate::str::contains("stale lock"));

        // someone else's lock file is left alone
        assert!(fx.path("data~").exists());
        assert!(!data.exists());
    }
}
