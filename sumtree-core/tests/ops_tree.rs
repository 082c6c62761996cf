use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fs;
use std::path::Path;

use sumtree_core::manifest::{Manifest, SUMFILE_NAME};
use sumtree_core::ops::{self, OpOptions};
use sumtree_core::progress::Progress;
use sumtree_core::scan::ScanOptions;

fn opts() -> OpOptions {
    OpOptions {
        scan: ScanOptions::new(false, &[]).unwrap(),
        overwrite: false,
    }
}

fn opts_hidden() -> OpOptions {
    OpOptions {
        scan: ScanOptions::new(true, &[]).unwrap(),
        overwrite: false,
    }
}

fn quiet() -> Progress {
    Progress::new(false)
}

fn write_random(path: &Path, bytes: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    fs::write(path, data).unwrap();
}

#[test]
fn each_directory_gets_its_own_sumfile() {
    let td = tempfile::tempdir().unwrap();
    fs::create_dir_all(td.path().join("sub/deep")).unwrap();
    write_random(&td.path().join("a.bin"), 4 * 1024, 1);
    write_random(&td.path().join("sub/b.bin"), 4 * 1024, 2);
    write_random(&td.path().join("sub/deep/c.bin"), 4 * 1024, 3);

    let r = ops::create(td.path(), &opts(), &quiet()).unwrap();
    assert!(!r.failed());
    assert_eq!(r.totals().written, 3);

    for (dir, name) in [("", "a.bin"), ("sub", "b.bin"), ("sub/deep", "c.bin")] {
        let d = td.path().join(dir);
        let m = Manifest::load(&d).unwrap().expect("sumfile per directory");
        assert_eq!(m.entries.len(), 1, "one record in {dir:?}");
        assert!(m.entries.contains_key(name));
    }
}

#[test]
fn directories_without_files_get_no_sumfile() {
    let td = tempfile::tempdir().unwrap();
    fs::create_dir_all(td.path().join("empty/inner")).unwrap();
    write_random(&td.path().join("a.bin"), 512, 4);
    ops::create(td.path(), &opts(), &quiet()).unwrap();
    assert!(!Manifest::exists(&td.path().join("empty")));
    assert!(!Manifest::exists(&td.path().join("empty/inner")));
}

#[test]
fn create_refuses_existing_sumfile_without_force() {
    let td = tempfile::tempdir().unwrap();
    write_random(&td.path().join("a.bin"), 512, 5);
    ops::create(td.path(), &opts(), &quiet()).unwrap();
    let before = fs::read(td.path().join(SUMFILE_NAME)).unwrap();

    write_random(&td.path().join("b.bin"), 512, 6);
    let second = ops::create(td.path(), &opts(), &quiet()).unwrap();
    assert!(second.failed());
    assert_eq!(second.totals().refused, 1);
    // refused directory is untouched
    assert_eq!(fs::read(td.path().join(SUMFILE_NAME)).unwrap(), before);

    let forced = OpOptions {
        overwrite: true,
        ..opts()
    };
    let third = ops::create(td.path(), &forced, &quiet()).unwrap();
    assert!(!third.failed());
    let m = Manifest::load(td.path()).unwrap().unwrap();
    assert_eq!(m.entries.len(), 2);
}

#[test]
fn verify_without_any_sumfile_is_an_error() {
    let td = tempfile::tempdir().unwrap();
    write_random(&td.path().join("a.bin"), 512, 7);
    let err = ops::verify(td.path(), &opts(), &quiet()).unwrap_err();
    assert!(format!("{err:#}").contains("no sumfile"));
}

#[test]
fn verify_on_missing_root_is_an_error() {
    let td = tempfile::tempdir().unwrap();
    let gone = td.path().join("nope");
    let err = ops::verify(&gone, &opts(), &quiet()).unwrap_err();
    assert!(format!("{err:#}").contains("root directory not found"));
}

#[test]
fn unmanifested_directory_files_are_added_warnings() {
    let td = tempfile::tempdir().unwrap();
    fs::create_dir(td.path().join("tracked")).unwrap();
    write_random(&td.path().join("tracked/a.bin"), 512, 8);
    ops::create(&td.path().join("tracked"), &opts(), &quiet()).unwrap();

    // a sibling directory was added after create
    fs::create_dir(td.path().join("later")).unwrap();
    write_random(&td.path().join("later/b.bin"), 512, 9);

    let v = ops::verify(td.path(), &opts(), &quiet()).unwrap();
    assert!(!v.failed(), "untracked files warn, they do not fail");
    let later = v.dirs.iter().find(|d| d.dir == "later").unwrap();
    assert_eq!(later.diff.added, vec!["b.bin"]);
}

#[test]
fn hidden_files_are_gated() {
    let td = tempfile::tempdir().unwrap();
    write_random(&td.path().join("plain.bin"), 256, 10);
    write_random(&td.path().join(".dotfile"), 256, 11);
    fs::create_dir(td.path().join(".dotdir")).unwrap();
    write_random(&td.path().join(".dotdir/inner.bin"), 256, 12);

    ops::create(td.path(), &opts(), &quiet()).unwrap();
    let m = Manifest::load(td.path()).unwrap().unwrap();
    assert!(m.entries.contains_key("plain.bin"));
    assert!(!m.entries.contains_key(".dotfile"));
    assert!(!Manifest::exists(&td.path().join(".dotdir")));

    let forced = OpOptions {
        overwrite: true,
        ..opts_hidden()
    };
    ops::create(td.path(), &forced, &quiet()).unwrap();
    let m = Manifest::load(td.path()).unwrap().unwrap();
    assert!(m.entries.contains_key(".dotfile"));
    let dot = Manifest::load(&td.path().join(".dotdir")).unwrap().unwrap();
    assert!(dot.entries.contains_key("inner.bin"));
}

#[test]
fn the_sumfile_itself_is_never_tracked() {
    let td = tempfile::tempdir().unwrap();
    write_random(&td.path().join("a.bin"), 256, 13);
    ops::create(td.path(), &opts_hidden(), &quiet()).unwrap();
    // even with hidden files included, a second pass must not record the
    // sumfile written by the first
    let r = ops::reset(td.path(), &opts_hidden(), &quiet()).unwrap();
    assert!(!r.failed());
    let m = Manifest::load(td.path()).unwrap().unwrap();
    assert_eq!(m.entries.len(), 1);
    assert!(!m.entries.contains_key(SUMFILE_NAME));
}

#[test]
fn builtin_and_user_excludes_are_skipped() {
    let td = tempfile::tempdir().unwrap();
    write_random(&td.path().join("keep.bin"), 256, 14);
    write_random(&td.path().join("desktop.ini"), 64, 15);
    write_random(&td.path().join("noise.log"), 64, 16);

    let o = OpOptions {
        scan: ScanOptions::new(false, &["*.log".to_string()]).unwrap(),
        overwrite: false,
    };
    ops::create(td.path(), &o, &quiet()).unwrap();
    let m = Manifest::load(td.path()).unwrap().unwrap();
    assert!(m.entries.contains_key("keep.bin"));
    assert!(!m.entries.contains_key("desktop.ini"));
    assert!(!m.entries.contains_key("noise.log"));
}

#[test]
fn reset_prunes_sumfiles_of_emptied_directories() {
    let td = tempfile::tempdir().unwrap();
    fs::create_dir(td.path().join("sub")).unwrap();
    write_random(&td.path().join("a.bin"), 256, 17);
    write_random(&td.path().join("sub/b.bin"), 256, 18);
    ops::create(td.path(), &opts(), &quiet()).unwrap();
    assert!(Manifest::exists(&td.path().join("sub")));

    fs::remove_file(td.path().join("sub/b.bin")).unwrap();
    let r = ops::reset(td.path(), &opts(), &quiet()).unwrap();
    assert!(!Manifest::exists(&td.path().join("sub")));
    let sub = r.dirs.iter().find(|d| d.dir == "sub").unwrap();
    assert!(sub.pruned);
    assert_eq!(sub.diff.missing, vec!["b.bin"]);
}

#[cfg(target_family = "unix")]
#[test]
fn directory_symlinks_are_not_followed() {
    let td = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    write_random(&outside.path().join("target.bin"), 256, 19);
    write_random(&td.path().join("a.bin"), 256, 20);
    std::os::unix::fs::symlink(outside.path(), td.path().join("link")).unwrap();

    let r = ops::create(td.path(), &opts(), &quiet()).unwrap();
    assert!(!r.failed());
    // nothing was written through the symlink
    assert!(!Manifest::exists(outside.path()));
    let m = Manifest::load(td.path()).unwrap().unwrap();
    assert!(!m.entries.contains_key("link"));
}

#[cfg(target_family = "unix")]
#[test]
fn file_symlinks_are_not_regular_files() {
    let td = tempfile::tempdir().unwrap();
    write_random(&td.path().join("real.bin"), 256, 21);
    std::os::unix::fs::symlink(td.path().join("real.bin"), td.path().join("alias.bin")).unwrap();
    ops::create(td.path(), &opts(), &quiet()).unwrap();
    let m = Manifest::load(td.path()).unwrap().unwrap();
    assert!(m.entries.contains_key("real.bin"));
    assert!(!m.entries.contains_key("alias.bin"));
}

#[test]
fn verify_is_deterministic_across_runs() {
    let td = tempfile::tempdir().unwrap();
    fs::create_dir(td.path().join("sub")).unwrap();
    write_random(&td.path().join("a.bin"), 1024, 22);
    write_random(&td.path().join("sub/b.bin"), 1024, 23);
    ops::create(td.path(), &opts(), &quiet()).unwrap();
    fs::write(td.path().join("a.bin"), b"tampered").unwrap();

    let v1 = ops::verify(td.path(), &opts(), &quiet()).unwrap();
    let v2 = ops::verify(td.path(), &opts(), &quiet()).unwrap();
    let flat = |r: &ops::RunReport| {
        r.dirs
            .iter()
            .map(|d| (d.dir.clone(), d.diff.modified.clone(), d.diff.unchanged.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(flat(&v1), flat(&v2));
}

#[test]
fn json_report_round_trips() {
    let td = tempfile::tempdir().unwrap();
    write_random(&td.path().join("a.bin"), 256, 24);
    let r = ops::create(td.path(), &opts(), &quiet()).unwrap();
    let json = serde_json::to_string(&r).unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["mode"], "create");
    assert_eq!(v["dirs"][0]["diff"]["added"][0], "a.bin");
}
