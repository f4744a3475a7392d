//! Integration tests for Utah

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::path::Path;
    use std::thread;
    use tempfile::TempDir;

    /// Command isolated from the user's config and cache
    fn utah(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("utah");
        cmd.env("UTAH_CONFIG", dir.path().join("config.toml"))
            .env("UTAH_CACHE_DIR", dir.path().join("cache"))
            .env_remove("UTAH_LOG_FORMAT")
            .env("CI", "1");
        cmd
    }

    fn cache_dir(dir: &TempDir) -> std::path::PathBuf {
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        cache
    }

    /// Serve one 200 response with `body` and return its URL
    fn serve_once(body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
        });

        format!("http://{}/images/served.img", addr)
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        utah(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("ephemeral VirtualBox machines"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        utah(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("utah"));
    }

    #[test]
    fn config_path_follows_flag() {
        let dir = TempDir::new().unwrap();
        utah(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_applies_cache_override() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        utah(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"))
            .stdout(predicate::str::contains(cache.display().to_string()))
            .stdout(predicate::str::contains("host_only_network = \"vboxnet0\""));
    }

    #[test]
    fn config_init_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        utah(&dir).args(["config", "init"]).assert().success();
        assert!(fs::read_to_string(&path).unwrap().contains("[machine]"));

        fs::write(&path, "[cache]\nroot = \"/tmp/elsewhere\"\n").unwrap();
        utah(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
        assert!(fs::read_to_string(&path).unwrap().contains("elsewhere"));

        utah(&dir).args(["config", "init", "--force"]).assert().success();
        assert!(!fs::read_to_string(&path).unwrap().contains("elsewhere"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), "[cache\n").unwrap();

        utah(&dir)
            .args(["cache", "path"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn cache_path_prints_root() {
        let dir = TempDir::new().unwrap();
        utah(&dir)
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                dir.path().join("cache").display().to_string(),
            ));
    }

    #[test]
    fn cache_list_empty() {
        let dir = TempDir::new().unwrap();
        utah(&dir)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("is empty"));

        utah(&dir)
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn cache_list_marks_partial_downloads() {
        let dir = TempDir::new().unwrap();
        let cache = cache_dir(&dir);
        fs::write(cache.join("disk.img"), b"complete").unwrap();
        fs::write(cache.join(".utahtmp-disk2.img-abc"), b"part").unwrap();

        utah(&dir)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("disk.img"))
            .stdout(predicate::str::contains("(partial)"))
            .stdout(predicate::str::contains("2 file(s)"));
    }

    #[test]
    fn cache_clean_removes_only_partial_downloads() {
        let dir = TempDir::new().unwrap();
        let cache = cache_dir(&dir);
        fs::write(cache.join("disk.img"), b"complete").unwrap();
        fs::write(cache.join(".utahtmp-disk2.img-abc"), b"part").unwrap();

        utah(&dir)
            .args(["cache", "clean"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1"));

        assert!(cache.join("disk.img").exists());
        assert!(!cache.join(".utahtmp-disk2.img-abc").exists());
    }

    #[test]
    fn fetch_downloads_into_cache() {
        let dir = TempDir::new().unwrap();
        let url = serve_once(b"image bytes");

        utah(&dir).args(["fetch", &url]).assert().success();

        let cached = dir.path().join("cache").join("served.img");
        assert_eq!(fs::read(&cached).unwrap(), b"image bytes");
    }

    #[test]
    fn fetch_skips_cached_entry() {
        let dir = TempDir::new().unwrap();
        let cache = cache_dir(&dir);
        fs::write(cache.join("served.img"), b"old").unwrap();

        // Nothing listens on this port; a cache hit must not connect
        utah(&dir)
            .args(["fetch", "http://127.0.0.1:9/images/served.img"])
            .assert()
            .success();
        assert_eq!(fs::read(cache.join("served.img")).unwrap(), b"old");
    }

    #[test]
    fn fetch_rejects_url_without_file_name() {
        let dir = TempDir::new().unwrap();
        utah(&dir)
            .args(["fetch", "http://127.0.0.1:9/images/"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid cache entry name"));
    }

    #[test]
    fn convert_skips_existing_output() {
        let dir = TempDir::new().unwrap();
        let cache = cache_dir(&dir);
        fs::write(cache.join("disk.vdi"), b"converted").unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[convert]\ntool = \"/nonexistent/qemu-img\"\n",
        )
        .unwrap();

        utah(&dir).args(["convert", "disk.img"]).assert().success();
        assert_eq!(fs::read(cache.join("disk.vdi")).unwrap(), b"converted");
    }

    #[test]
    fn convert_requires_cached_source() {
        let dir = TempDir::new().unwrap();
        utah(&dir)
            .args(["convert", "missing.img"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not present"));
    }

    #[cfg(unix)]
    #[test]
    fn convert_surfaces_tool_diagnostics() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let cache = cache_dir(&dir);
        fs::write(cache.join("disk.img"), b"raw").unwrap();

        let tool = dir.path().join("fake-qemu-img");
        fs::write(&tool, "#!/bin/sh\necho 'could not open image' >&2\nexit 1\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        write_tool_config(dir.path(), &tool);

        utah(&dir)
            .args(["convert", "disk.img"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("could not open image"));
        assert!(!cache.join("disk.vdi").exists());
    }

    fn write_tool_config(dir: &Path, tool: &Path) {
        fs::write(
            dir.join("config.toml"),
            format!("[convert]\ntool = {:?}\n", tool.display().to_string()),
        )
        .unwrap();
    }

    #[test]
    fn run_rejects_bad_checksum_before_provisioning() {
        let dir = TempDir::new().unwrap();
        let url = serve_once(b"image bytes");

        utah(&dir)
            .args(["run", "--url", &url, "--sha256", "00"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Checksum mismatch"));
        assert!(!dir.path().join("cache").join("served.img").exists());
    }

    #[test]
    fn completions_generate() {
        let dir = TempDir::new().unwrap();
        utah(&dir)
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("utah"));
    }

    #[test]
    fn status_runs() {
        // Tools may be missing on the test host, but status must not fail
        let dir = TempDir::new().unwrap();
        utah(&dir).arg("status").assert().success();
    }
}
