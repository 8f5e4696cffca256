use media_cycle::config::Configuration;
use media_cycle::playlist::Ordering;
use media_cycle::tasks::engine::EngineOptions;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn parse_kebab_case_config() {
    let yaml = r#"
media-library-path: "/media"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.media_library_path, PathBuf::from("/media"));
    assert_eq!(cfg.interval_seconds, 5);
    assert_eq!(cfg.ordering, Ordering::Selection);
    assert!(cfg.swipe_to_change);
    assert!(cfg.watch_library);
    assert_eq!(cfg.state_file, None);
    assert_eq!(cfg.headless_video_duration, Duration::from_secs(10));
}

#[test]
fn parse_full_config() {
    let yaml = r#"
media-library-path: "/media"
interval-seconds: 12
ordering: random
shuffle-seed: 7
state-file: "/var/lib/media-cycle/state.json"
target-width: 800
target-height: 480
mute-videos: true
swipe-to-change: false
watch-library: false
command-queue-capacity: 4
headless-video-duration: 1m 30s
"#;
    let cfg: Configuration = serde_yaml::from_str::<Configuration>(yaml)
        .unwrap()
        .validated()
        .unwrap();
    assert_eq!(cfg.interval_seconds, 12);
    assert_eq!(cfg.ordering, Ordering::Random);
    assert_eq!(cfg.shuffle_seed, Some(7));
    assert_eq!(
        cfg.state_file,
        Some(PathBuf::from("/var/lib/media-cycle/state.json"))
    );
    assert!(cfg.mute_videos);
    assert_eq!(cfg.headless_video_duration, Duration::from_secs(90));

    let options = EngineOptions::from(&cfg);
    assert_eq!((options.target_width, options.target_height), (800, 480));
    assert!(!options.swipe_to_change);
    assert_eq!(options.command_queue_capacity, 4);
}

#[test]
fn unknown_keys_are_rejected() {
    let yaml = r#"
media-library-path: "/media"
dwell-ms: 2000
"#;
    assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
}

#[test]
fn unknown_ordering_is_rejected() {
    let yaml = r#"
media-library-path: "/media"
ordering: weighted
"#;
    assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
}

#[test]
fn validation_rejects_zero_values() {
    for yaml in [
        "media-library-path: /m\ninterval-seconds: 0\n",
        "media-library-path: /m\ncommand-queue-capacity: 0\n",
        "media-library-path: /m\ntarget-width: 0\n",
        "interval-seconds: 5\n",
    ] {
        let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validated().is_err(), "accepted: {yaml}");
    }
}

#[test]
fn from_yaml_file_reads_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "media-library-path: /media\ninterval-seconds: 3\n").unwrap();
    let cfg = Configuration::from_yaml_file(&path).unwrap();
    assert_eq!(cfg.interval_seconds, 3);
    assert!(Configuration::from_yaml_file(dir.path().join("missing.yaml")).is_err());
}
