use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_dataset_manifest::domain::{EntryKind, EntryOptions};
use kira_dataset_manifest::error::ManifestError;
use kira_dataset_manifest::registry::{LookupOptions, Manifest, RegisterOptions, SearchOptions};

fn named(name: &str, entry: EntryOptions) -> RegisterOptions {
    RegisterOptions {
        name: Some(name.to_string()),
        entry,
        ..RegisterOptions::default()
    }
}

fn version(value: &str) -> EntryOptions {
    EntryOptions {
        version: Some(value.to_string()),
        ..EntryOptions::default()
    }
}

fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

#[test]
fn http_dataset_derives_key_format_and_paths() {
    let mut manifest = Manifest::new("/data");
    let (name, entry) = manifest
        .register(
            "https://example.org/d/1?format=zip",
            RegisterOptions {
                entry: EntryOptions {
                    doi: Some("10.1/X".to_string()),
                    extract: true,
                    ..EntryOptions::default()
                },
                ..RegisterOptions::default()
            },
        )
        .unwrap();

    assert_eq!(name, "example.org/d/1");
    assert_eq!(entry.key, "example.org/d/1");
    assert_eq!(entry.format(), Some("zip"));
    assert!(entry.extract());
    assert_eq!(manifest.resolve_path(&entry, false), "/data/example.org/d/1");
    assert_eq!(manifest.resolve_path(&entry, true), "/data/example.org/d/1.d");
}

#[test]
fn archive_path_on_git_host_is_not_a_repo_name() {
    let mut manifest = Manifest::new("/data");
    let (name, entry) = manifest
        .register(
            "https://github.com/org/repo/archive/refs/tags/v2.1.zip",
            RegisterOptions::default(),
        )
        .unwrap();
    assert_eq!(name, "github.com/org/repo/archive/refs/tags/v2.1");
    assert_matches!(entry.kind, EntryKind::Download { .. });
}

#[test]
fn git_remote_gets_owner_repo_name() {
    let mut manifest = Manifest::new("/data");
    let (name, entry) = manifest
        .register("git@github.com:org/repo.git", RegisterOptions::default())
        .unwrap();
    assert_eq!(name, "org/repo");
    assert!(entry.is_repository());
}

#[test]
fn registering_the_same_dataset_twice_is_a_noop() {
    let temp = tempfile::tempdir().unwrap();
    let file = utf8(&temp.path().join("datasets.toml"));
    let mut manifest = Manifest::open(file.clone(), utf8(temp.path())).unwrap();

    manifest
        .register("https://h/set.csv", named("set", EntryOptions::default()))
        .unwrap();
    let written = std::fs::metadata(file.as_std_path()).unwrap().modified().unwrap();

    // Without overwrite: an unchanged duplicate must not be an error.
    let (name, _) = manifest
        .register("https://h/set.csv", named("set", EntryOptions::default()))
        .unwrap();
    assert_eq!(name, "set");
    assert_eq!(manifest.len(), 1);
    let after = std::fs::metadata(file.as_std_path()).unwrap().modified().unwrap();
    assert_eq!(written, after);
}

#[test]
fn conflicting_versions_need_overwrite() {
    let mut manifest = Manifest::new("/data");
    manifest.register("https://h/p", named("foo", version("1"))).unwrap();

    let err = manifest
        .register("https://h/p", named("foo", version("2")))
        .unwrap_err();
    assert_matches!(err, ManifestError::DuplicateConflict { .. });
    assert_eq!(manifest.get("foo").unwrap().version.as_deref(), Some("1"));

    let options = RegisterOptions {
        overwrite: true,
        ..named("foo", version("2"))
    };
    manifest.register("https://h/p", options).unwrap();
    assert_eq!(manifest.get("foo").unwrap().version.as_deref(), Some("2"));
    assert_eq!(manifest.len(), 1);
}

#[test]
fn rename_requires_overwrite() {
    let mut manifest = Manifest::new("/data");
    manifest
        .register("https://h/set.csv", named("old", EntryOptions::default()))
        .unwrap();

    let err = manifest
        .register("https://h/set.csv", named("new", EntryOptions::default()))
        .unwrap_err();
    assert_matches!(err, ManifestError::DuplicateName { .. });
    assert!(manifest.get("old").is_some());

    let options = RegisterOptions {
        overwrite: true,
        ..named("new", EntryOptions::default())
    };
    let (name, _) = manifest.register("https://h/set.csv", options).unwrap();
    assert_eq!(name, "new");
    assert!(manifest.get("old").is_none());
    assert!(manifest.get("new").is_some());
}

#[test]
fn unrelated_entries_fail_identity_check() {
    let mut manifest = Manifest::new("/data");
    manifest
        .register("https://h/a.csv", named("a", version("1")))
        .unwrap();
    let candidate = kira_dataset_manifest::domain::Entry::new("https://h/b.csv", version("2"))
        .unwrap();

    let err = manifest.update_entry("a", "b", candidate, true).unwrap_err();
    assert_matches!(err, ManifestError::IdentityMismatch { .. });
    assert!(manifest.get("a").is_some());
    assert!(manifest.get("b").is_none());
}

#[test]
fn skipping_duplicate_check_allows_shared_keys() {
    let mut manifest = Manifest::new("/data");
    manifest
        .register("https://h/set.csv", named("first", EntryOptions::default()))
        .unwrap();
    let options = RegisterOptions {
        check_duplicate: false,
        ..named("second", EntryOptions::default())
    };
    manifest.register("https://h/set.csv", options).unwrap();
    assert_eq!(manifest.len(), 2);
}

#[test]
fn exact_name_match_comes_before_alias_match() {
    let mut manifest = Manifest::new("/data");
    manifest
        .register(
            "https://h/a.csv",
            named(
                "A",
                EntryOptions {
                    key: Some("foo".to_string()),
                    aliases: vec!["X".to_string()],
                    ..EntryOptions::default()
                },
            ),
        )
        .unwrap();
    manifest
        .register(
            "https://h/b.csv",
            named(
                "B",
                EntryOptions {
                    key: Some("bar".to_string()),
                    aliases: vec!["foo".to_string()],
                    ..EntryOptions::default()
                },
            ),
        )
        .unwrap();

    let results = manifest.search("foo", SearchOptions::default());
    let names = results.iter().map(|(name, _)| *name).collect::<Vec<_>>();
    assert_eq!(names, vec!["A", "B"]);

    let names_only = manifest.search(
        "foo",
        SearchOptions {
            alt: false,
            partial: false,
        },
    );
    assert!(names_only.is_empty());

    let err = manifest.lookup("foo", LookupOptions::default()).unwrap_err();
    assert_matches!(err, ManifestError::MultipleMatches { candidates, .. } if candidates == ["A", "B"]);

    let (first, _) = manifest
        .lookup(
            "foo",
            LookupOptions {
                first_match: true,
                ..LookupOptions::default()
            },
        )
        .unwrap();
    assert_eq!(first, "A");
}

#[test]
fn search_ignores_case_and_supports_partial() {
    let mut manifest = Manifest::new("/data");
    manifest
        .register(
            "https://h/genes.csv",
            named(
                "Genes",
                EntryOptions {
                    doi: Some("10.5281/zenodo.42".to_string()),
                    ..EntryOptions::default()
                },
            ),
        )
        .unwrap();
    manifest
        .register("https://h/proteins.csv", named("proteins", EntryOptions::default()))
        .unwrap();

    let exact = manifest.search("GENES", SearchOptions::default());
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].0, "Genes");

    let by_doi = manifest.search("10.5281/ZENODO.42", SearchOptions::default());
    assert_eq!(by_doi.len(), 1);

    let partial = SearchOptions {
        alt: true,
        partial: true,
    };
    let names = manifest
        .search("e", partial)
        .into_iter()
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Genes", "proteins"]);

    assert!(manifest.find("zenodo", LookupOptions::default()).unwrap().is_none());
    assert_matches!(
        manifest.lookup("missing", LookupOptions::default()),
        Err(ManifestError::NotFound(_))
    );
}

#[test]
fn manifest_file_round_trips() {
    let temp = tempfile::tempdir().unwrap();
    let file = utf8(&temp.path().join("datasets.toml"));
    let root = utf8(&temp.path().join("data"));

    let mut manifest = Manifest::open(file.clone(), root.clone()).unwrap();
    manifest
        .register(
            "https://example.org/d/1?format=zip",
            RegisterOptions {
                name: Some("one".to_string()),
                entry: EntryOptions {
                    doi: Some("10.1/X".to_string()),
                    aliases: vec!["first".to_string()],
                    extract: true,
                    ..EntryOptions::default()
                },
                ..RegisterOptions::default()
            },
        )
        .unwrap();
    manifest
        .register(
            "https://github.com/org/repo.git",
            RegisterOptions {
                entry: EntryOptions {
                    branch: Some("main".to_string()),
                    ..EntryOptions::default()
                },
                ..RegisterOptions::default()
            },
        )
        .unwrap();

    let loaded = Manifest::load(file, root).unwrap();
    assert_eq!(loaded.entries(), manifest.entries());
    assert_eq!(loaded.get("org/repo").unwrap().branch(), Some("main"));
}

#[test]
fn failed_save_rolls_back() {
    let temp = tempfile::tempdir().unwrap();
    let blocker = temp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let file = utf8(&blocker.join("datasets.toml"));

    let mut manifest = Manifest::open(file, utf8(temp.path())).unwrap();
    let err = manifest
        .register("https://h/set.csv", RegisterOptions::default())
        .unwrap_err();
    assert_matches!(err, ManifestError::ManifestWrite(_));
    assert!(manifest.is_empty());
}

#[test]
fn remove_drops_only_the_entry() {
    let temp = tempfile::tempdir().unwrap();
    let file = utf8(&temp.path().join("datasets.toml"));
    let mut manifest = Manifest::open(file.clone(), utf8(temp.path())).unwrap();
    manifest
        .register("https://h/a.csv", named("a", EntryOptions::default()))
        .unwrap();
    manifest
        .register("https://h/b.csv", named("b", EntryOptions::default()))
        .unwrap();

    manifest.remove("a").unwrap();
    assert_matches!(manifest.remove("a"), Err(ManifestError::NotFound(_)));

    let loaded = Manifest::load(file, utf8(temp.path())).unwrap();
    assert_eq!(loaded.entries().keys().collect::<Vec<_>>(), vec!["b"]);
}

#[test]
fn conflict_reports_both_entries_and_stale_copies() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    let mut manifest = Manifest::new(root.clone());
    manifest.register("https://h/p", named("foo", version("1"))).unwrap();

    let old_path = temp.path().join("h/p#1");
    let new_path = temp.path().join("h/p#2");
    std::fs::create_dir_all(temp.path().join("h")).unwrap();
    std::fs::write(&old_path, b"one").unwrap();
    std::fs::write(&new_path, b"two").unwrap();

    let err = manifest
        .register("https://h/p", named("foo", version("2")))
        .unwrap_err();
    let details = match err {
        ManifestError::DuplicateConflict { details, .. } => details,
        other => panic!("unexpected error: {other:?}"),
    };
    assert!(details.contains("version=1"), "{details}");
    assert!(details.contains("version=2"), "{details}");
    assert!(details.contains(&old_path.display().to_string()), "{details}");
    assert!(details.contains(&new_path.display().to_string()), "{details}");
    assert!(details.contains("remove the stale copy manually"), "{details}");

    assert_eq!(std::fs::read(&old_path).unwrap(), b"one");
    assert_eq!(std::fs::read(&new_path).unwrap(), b"two");
}

#[test]
fn conflict_without_stale_copies_has_no_disk_warning() {
    let temp = tempfile::tempdir().unwrap();
    let mut manifest = Manifest::new(utf8(temp.path()));
    manifest.register("https://h/p", named("foo", version("1"))).unwrap();

    let err = manifest
        .register("https://h/p", named("foo", version("2")))
        .unwrap_err();
    assert_matches!(
        err,
        ManifestError::DuplicateConflict { details, .. } if !details.contains("stale copy")
    );
}

#[test]
fn rename_onto_an_unrelated_name_is_refused() {
    let mut manifest = Manifest::new("/data");
    manifest
        .register("https://h/a.csv", named("a", EntryOptions::default()))
        .unwrap();
    manifest
        .register("https://h/b.csv", named("b", EntryOptions::default()))
        .unwrap();

    let options = RegisterOptions {
        overwrite: true,
        ..named("b", EntryOptions::default())
    };
    let err = manifest.register("https://h/a.csv", options).unwrap_err();
    assert_matches!(err, ManifestError::NameTaken { name, .. } if name == "b");
    assert_eq!(manifest.get("a").unwrap().uri, "https://h/a.csv");
    assert_eq!(manifest.get("b").unwrap().uri, "https://h/b.csv");
}

#[test]
fn malformed_locators_are_not_registered_as_paths() {
    let mut manifest = Manifest::new("/data");
    for uri in ["https:/example.org/x", "ftp:data"] {
        assert_matches!(
            manifest.register(uri, RegisterOptions::default()),
            Err(ManifestError::Parse { .. })
        );
    }
    assert!(manifest.is_empty());
}
