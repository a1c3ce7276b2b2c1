//! End-to-end pipeline tests over fabricated ORC collections.
//!
//! Archives are built on the fly with the 7z writer, so the suite carries no
//! binary fixtures.

use std::io::Read;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::read::GzDecoder;

use orc2timeline_core::cancel::CancelFlag;
use orc2timeline_core::config::Config;
use orc2timeline_core::extract::{extract_for_instance, retain_matching_header};
use orc2timeline_core::orc::{bundle_for_single_host, discover_host_jobs};
use orc2timeline_core::orchestrator::{run_host_jobs, HostFailure, RunOptions};

// --- fixture builders -------------------------------------------------------

/// Write `members` under a staging directory and compress it to `dir/name`.
fn build_outer(dir: &Path, name: &str, members: &[(&str, Vec<u8>)]) -> PathBuf {
    let stage = dir.join(format!("stage_{name}"));
    for (rel, bytes) in members {
        let target = stage.join(rel);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, bytes).unwrap();
    }
    let dest = dir.join(name);
    sevenz_rust::compress_to_path(&stage, &dest).unwrap();
    dest
}

/// Build an outer archive whose members are themselves 7z sub-archives.
fn build_outer_with_subs(
    dir: &Path,
    name: &str,
    subs: &[(&str, Vec<(&str, Vec<u8>)>)],
) -> PathBuf {
    let stage = dir.join(format!("stage_{name}"));
    std::fs::create_dir_all(&stage).unwrap();
    for (sub_name, members) in subs {
        let sub_stage = dir.join(format!("stage_{name}_{sub_name}"));
        for (rel, bytes) in members {
            let target = sub_stage.join(rel);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(&target, bytes).unwrap();
        }
        sevenz_rust::compress_to_path(&sub_stage, stage.join(sub_name)).unwrap();
    }
    let dest = dir.join(name);
    sevenz_rust::compress_to_path(&stage, &dest).unwrap();
    dest
}

const EPOCH_AS_FILETIME: i64 = 116_444_736_000_000_000;

/// A v2 `$I` recycle-bin record.
fn dollar_i_record(file_path: &str, size: i64, unix_micros: i64) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.write_i64::<LittleEndian>(2).unwrap();
    raw.write_i64::<LittleEndian>(size).unwrap();
    raw.write_i64::<LittleEndian>(unix_micros * 10 + EPOCH_AS_FILETIME)
        .unwrap();
    let units: Vec<u16> = file_path.encode_utf16().chain(std::iter::once(0)).collect();
    raw.write_i32::<LittleEndian>(units.len() as i32).unwrap();
    for unit in units {
        raw.write_u16::<LittleEndian>(unit).unwrap();
    }
    raw
}

fn usn_csv(rows: &[(&str, &str)]) -> Vec<u8> {
    let mut text = String::from("USN,TimeStamp,FullPath,FRN,Reason\n");
    for (index, (timestamp, path)) in rows.iter().enumerate() {
        text.push_str(&format!("{index},{timestamp},{path},0x20,CLOSE\n"));
    }
    text.into_bytes()
}

fn test_config(dir: &Path, yaml: &str) -> Config {
    let path = dir.join("Orc2Timeline.yaml");
    std::fs::write(&path, yaml).unwrap();
    Config::from_file(&path).unwrap()
}

fn read_timeline(path: &Path) -> Vec<String> {
    let mut text = String::new();
    GzDecoder::new(std::fs::File::open(path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text.lines().map(str::to_string).collect()
}

fn assert_sorted_and_unique(lines: &[String]) {
    for pair in lines.windows(2) {
        assert!(pair[0] < pair[1], "out of order or duplicate: {pair:?}");
    }
}

fn options(jobs: usize, overwrite: bool, tmp: &Path) -> RunOptions {
    RunOptions {
        jobs,
        overwrite,
        tmp_dir: Some(tmp.to_path_buf()),
        cancel: CancelFlag::new(),
    }
}

const RECYCLE_CONF: &str = r#"
Plugins:
  - RecycleBinToTimeline:
      archives: ["General", "Little", "Offline"]
      match_pattern: '.*\$I[^/]*$'
      source_type: "RecycleBin"
"#;

// --- scenarios --------------------------------------------------------------

#[tokio::test]
async fn multi_host_grouping_produces_one_timeline_per_host() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("in");
    let output = work.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::create_dir_all(&output).unwrap();

    build_outer(
        &input,
        "DFIR-ORC_S_A.dom_General.7z",
        &[(
            "$IAAAAAA.txt",
            dollar_i_record("C:\\Users\\a\\one.txt", 1, 1_600_000_000_000_000),
        )],
    );
    build_outer(
        &input,
        "DFIR-ORC_S_A.dom_Little.7z",
        &[(
            "$IBBBBBB.txt",
            dollar_i_record("C:\\Users\\a\\two.txt", 2, 1_600_000_100_000_000),
        )],
    );
    build_outer(
        &input,
        "DFIR-ORC_S_B.dom_Offline.7z",
        &[(
            "$ICCCCCC.txt",
            dollar_i_record("C:\\Users\\b\\three.txt", 3, 1_600_000_200_000_000),
        )],
    );

    let config = test_config(work.path(), RECYCLE_CONF);
    let jobs = discover_host_jobs(&input, &output).unwrap();
    assert_eq!(jobs.len(), 2);

    let report = run_host_jobs(&config, jobs, &options(2, false, work.path()))
        .await
        .unwrap();
    assert!(report.all_hosts_succeeded());

    let a_lines = read_timeline(&output.join("A.dom.csv.gz"));
    let b_lines = read_timeline(&output.join("B.dom.csv.gz"));
    assert_eq!(a_lines.len(), 2);
    assert_eq!(b_lines.len(), 1);
    assert!(a_lines.iter().all(|line| line.split(',').nth(1) == Some("A.dom")));
    assert!(b_lines.iter().all(|line| line.split(',').nth(1) == Some("B.dom")));
    assert_sorted_and_unique(&a_lines);
}

#[tokio::test]
async fn explicit_file_list_spanning_hosts_is_rejected() {
    let work = tempfile::tempdir().unwrap();
    let files = vec![
        work.path().join("DFIR-ORC_S_A.dom_General.7z"),
        work.path().join("DFIR-ORC_S_A.dom_Little.7z"),
        work.path().join("DFIR-ORC_S_B.dom_Offline.7z"),
    ];
    let err = bundle_for_single_host(&files).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("A.dom"));
    assert!(message.contains("B.dom"));
}

#[tokio::test]
async fn header_filter_keeps_only_genuine_files() {
    let work = tempfile::tempdir().unwrap();
    let lnk_header: &[u8] = &[
        0x4C, 0x00, 0x00, 0x00, 0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
    ];
    let mut genuine = lnk_header.to_vec();
    genuine.extend_from_slice(b"payload");
    let mut fake = genuine.clone();
    fake[0] = 0x00;

    let outer = build_outer(
        work.path(),
        "DFIR-ORC_S_HOST_General.7z",
        &[("genuine.lnk", genuine), ("fake.lnk", fake)],
    );

    let pattern = regex::Regex::new(r".*\.lnk$").unwrap();
    let scratch = work.path().join("scratch");
    let report =
        extract_for_instance(&outer, None, &pattern, &scratch, &CancelFlag::new()).unwrap();
    assert_eq!(report.artefacts.len(), 2);

    let kept = retain_matching_header(report.artefacts, lnk_header).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].member_path, "genuine.lnk");
}

#[tokio::test]
async fn sub_archive_cartesian_misses_contribute_nothing() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("in");
    let output = work.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::create_dir_all(&output).unwrap();

    // Event.7z exists only under General, Event_Little.7z only under Little;
    // the two missing combinations must neither error nor emit.
    build_outer_with_subs(
        &input,
        "DFIR-ORC_S_HOST_General.7z",
        &[(
            "Event.7z",
            vec![(
                "USNInfo.csv",
                usn_csv(&[("2021-01-01 10:00:00.000", "\\from\\general.dll")]),
            )],
        )],
    );
    build_outer_with_subs(
        &input,
        "DFIR-ORC_S_HOST_Little.7z",
        &[(
            "Event_Little.7z",
            vec![(
                "USNInfo.csv",
                usn_csv(&[("2021-01-01 11:00:00.000", "\\from\\little.dll")]),
            )],
        )],
    );

    let config = test_config(
        work.path(),
        r#"
Plugins:
  - USNInfoToTimeline:
      archives: ["General", "Little"]
      sub_archives: ["Event.7z", "Event_Little.7z"]
      match_pattern: '.*USNInfo\.csv$'
      source_type: "USN journal"
"#,
    );

    let jobs = discover_host_jobs(&input, &output).unwrap();
    let report = run_host_jobs(&config, jobs, &options(2, false, work.path()))
        .await
        .unwrap();
    assert!(report.all_hosts_succeeded());

    let lines = read_timeline(&output.join("HOST.csv.gz"));
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().any(|l| l.contains("general.dll")));
    assert!(lines.iter().any(|l| l.contains("little.dll")));
}

#[tokio::test]
async fn identical_events_from_two_instances_collapse() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("in");
    let output = work.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::create_dir_all(&output).unwrap();

    let same_rows = usn_csv(&[("2021-06-01 09:00:00.000", "\\shared\\dup.dll")]);
    build_outer_with_subs(
        &input,
        "DFIR-ORC_S_HOST_General.7z",
        &[
            ("Event.7z", vec![("USNInfo.csv", same_rows.clone())]),
            ("Event_bis.7z", vec![("USNInfo.csv", same_rows)]),
        ],
    );

    let config = test_config(
        work.path(),
        r#"
Plugins:
  - USNInfoToTimeline:
      archives: ["General"]
      sub_archives: ["Event.7z", "Event_bis.7z"]
      match_pattern: '.*USNInfo\.csv$'
      source_type: "USN journal"
"#,
    );

    let jobs = discover_host_jobs(&input, &output).unwrap();
    let report = run_host_jobs(&config, jobs, &options(2, false, work.path()))
        .await
        .unwrap();
    assert!(report.all_hosts_succeeded());

    let lines = read_timeline(&output.join("HOST.csv.gz"));
    let dup_count = lines.iter().filter(|l| l.contains("dup.dll")).count();
    assert_eq!(dup_count, 1, "identical rows from two instances collapse");
}

#[tokio::test]
async fn tiny_chunks_spill_and_still_sort_globally() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("in");
    let output = work.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::create_dir_all(&output).unwrap();

    // Ten rows, deliberately out of order, against a chunk size of three.
    let rows: Vec<(String, String)> = [7, 3, 9, 1, 5, 2, 8, 4, 10, 6]
        .iter()
        .map(|day| {
            (
                format!("2021-03-{day:02} 12:00:00.000"),
                format!("\\files\\f{day}.bin"),
            )
        })
        .collect();
    let row_refs: Vec<(&str, &str)> = rows
        .iter()
        .map(|(ts, path)| (ts.as_str(), path.as_str()))
        .collect();
    build_outer(
        &input,
        "DFIR-ORC_S_HOST_General.7z",
        &[("USNInfo.csv", usn_csv(&row_refs))],
    );

    let config = test_config(
        work.path(),
        r#"
Plugins:
  - USNInfoToTimeline:
      archives: ["General"]
      match_pattern: '.*USNInfo\.csv$'
      source_type: "USN journal"
Options:
  chunk_size: 3
"#,
    );

    let jobs = discover_host_jobs(&input, &output).unwrap();
    let report = run_host_jobs(&config, jobs, &options(1, false, work.path()))
        .await
        .unwrap();
    assert!(report.all_hosts_succeeded());
    assert_eq!(report.total_events(), 10);

    let lines = read_timeline(&output.join("HOST.csv.gz"));
    assert_eq!(lines.len(), 10);
    assert_sorted_and_unique(&lines);
    for day in 1..=10 {
        assert!(lines
            .iter()
            .any(|l| l.starts_with(&format!("2021-03-{day:02} 12:00:00.000"))));
    }
}

#[tokio::test]
async fn overwrite_protection_then_idempotent_rerun() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("in");
    let output = work.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::create_dir_all(&output).unwrap();

    build_outer(
        &input,
        "DFIR-ORC_S_HOST_General.7z",
        &[(
            "$IDDDDDD.txt",
            dollar_i_record("C:\\temp\\gone.txt", 9, 1_610_000_000_000_000),
        )],
    );
    let config = test_config(work.path(), RECYCLE_CONF);

    let jobs = discover_host_jobs(&input, &output).unwrap();
    let report = run_host_jobs(&config, jobs, &options(1, false, work.path()))
        .await
        .unwrap();
    assert!(report.all_hosts_succeeded());
    let first = read_timeline(&output.join("HOST.csv.gz"));

    // Second run without --overwrite refuses to touch the output.
    let jobs = discover_host_jobs(&input, &output).unwrap();
    let report = run_host_jobs(&config, jobs, &options(1, false, work.path()))
        .await
        .unwrap();
    assert!(!report.all_hosts_succeeded());
    assert!(matches!(
        report.hosts[0].result,
        Err(HostFailure::OutputExists(_))
    ));

    // Third run with --overwrite reproduces the identical timeline.
    let jobs = discover_host_jobs(&input, &output).unwrap();
    let report = run_host_jobs(&config, jobs, &options(1, true, work.path()))
        .await
        .unwrap();
    assert!(report.all_hosts_succeeded());
    let third = read_timeline(&output.join("HOST.csv.gz"));
    assert_eq!(first, third);
    assert!(
        !output.join("HOST.csv.gz.tmp").exists(),
        "tmp sibling is renamed away"
    );
}

#[tokio::test]
async fn corrupt_sub_archive_is_skipped_not_fatal() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("in");
    let output = work.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::create_dir_all(&output).unwrap();

    // One valid sub-archive, one member that claims to be a 7z but is not.
    let stage = work.path().join("outer_stage");
    std::fs::create_dir_all(&stage).unwrap();
    let good_stage = work.path().join("good_stage");
    std::fs::create_dir_all(&good_stage).unwrap();
    std::fs::write(
        good_stage.join("USNInfo.csv"),
        usn_csv(&[("2021-01-01 00:00:00.000", "\\ok.dll")]),
    )
    .unwrap();
    sevenz_rust::compress_to_path(&good_stage, stage.join("Event.7z")).unwrap();
    std::fs::write(stage.join("Event_bis.7z"), b"definitely not a 7z").unwrap();
    sevenz_rust::compress_to_path(&stage, input.join("DFIR-ORC_S_HOST_General.7z")).unwrap();

    let config = test_config(
        work.path(),
        r#"
Plugins:
  - USNInfoToTimeline:
      archives: ["General"]
      sub_archives: ["Event.7z", "Event_bis.7z"]
      match_pattern: '.*USNInfo\.csv$'
      source_type: "USN journal"
"#,
    );

    let jobs = discover_host_jobs(&input, &output).unwrap();
    let report = run_host_jobs(&config, jobs, &options(1, false, work.path()))
        .await
        .unwrap();
    assert!(report.all_hosts_succeeded());
    let lines = read_timeline(&output.join("HOST.csv.gz"));
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("ok.dll"));
}
