//! Filesystem-backed integration tests (spec §8's testable properties and
//! concrete scenarios), exercised through `FsPool`/`FreshBowl`/`OverlayBowl`
//! instead of the `MemPool`-only unit tests scattered through `src/`.

use std::fs;
use std::io::BufReader;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use wharf_patch::bowl::{Bowl, FreshBowl, OverlayBowl};
use wharf_patch::consumer::NopConsumer;
use wharf_patch::diff::write_patch;
use wharf_patch::patch::Patch;
use wharf_patch::pool::FsPool;
use wharf_patch::protos::{pwr, tlc};
use wharf_patch::signature::Signature;
use wharf_patch::signature::compute::compute_signature;
use wharf_patch::signature::verify::Blame;
use wharf_patch::BLOCK_SIZE;

fn no_compression() -> pwr::CompressionSettings {
  pwr::CompressionSettings {
    algorithm: pwr::CompressionAlgorithm::None as i32,
    quality: 0,
  }
}

fn file(path: &str, size: i64) -> tlc::File {
  tlc::File {
    path: path.to_string(),
    mode: 0o644,
    size,
  }
}

fn container(files: Vec<tlc::File>) -> tlc::Container {
  let size = files.iter().map(|f| f.size).sum();
  tlc::Container {
    size,
    dirs: vec![],
    symlinks: vec![],
    files,
  }
}

fn write(dir: &Path, name: &str, contents: &[u8]) {
  let path = dir.join(name);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, contents).unwrap();
}

fn read(dir: &Path, name: &str) -> Vec<u8> {
  fs::read(dir.join(name)).unwrap()
}

fn signature_bytes(container: &tlc::Container, pool: &FsPool<'_>) -> Vec<u8> {
  let mut bytes = Vec::new();
  compute_signature(&mut bytes, container, pool, no_compression(), &NopConsumer).unwrap();
  bytes
}

fn patch_bytes(
  new_container: &tlc::Container,
  old_signature_bytes: &[u8],
  new_pool: &FsPool<'_>,
) -> Vec<u8> {
  let mut sig_reader = BufReader::new(old_signature_bytes);
  let mut old_signature = Signature::read(&mut sig_reader).unwrap();

  let mut bytes = Vec::new();
  write_patch(&mut bytes, new_container, &mut old_signature, new_pool, no_compression(), &NopConsumer).unwrap();
  bytes
}

/// Property 1 (spec §8): applying a patch against the old build it was
/// diffed from, through a fresh output directory, reproduces the new
/// build byte-for-byte.
#[test]
fn round_trip_into_fresh_directory() {
  let old_dir = tempfile::tempdir().unwrap();
  let new_dir = tempfile::tempdir().unwrap();
  let out_dir = tempfile::tempdir().unwrap();

  write(old_dir.path(), "keep.txt", b"unchanged bytes, carried across every build");
  write(old_dir.path(), "grow.txt", b"short");

  write(new_dir.path(), "keep.txt", b"unchanged bytes, carried across every build");
  write(new_dir.path(), "grow.txt", b"this file grew a lot longer than it used to be");

  let old_container = container(vec![file("keep.txt", 45), file("grow.txt", 5)]);
  let new_container = container(vec![
    file("keep.txt", 45),
    file("grow.txt", "this file grew a lot longer than it used to be".len() as i64),
  ]);

  let old_pool = FsPool::new(&old_container, old_dir.path());
  let new_pool = FsPool::new(&new_container, new_dir.path());

  let sig_bytes = signature_bytes(&old_container, &old_pool);
  let patch = patch_bytes(&new_container, &sig_bytes, &new_pool);

  let mut patch_reader = BufReader::new(patch.as_slice());
  let mut decoded = Patch::read(&mut patch_reader).unwrap();

  let mut bowl = FreshBowl::new(&new_container, &old_pool, out_dir.path());
  decoded.apply(&old_pool, &mut bowl, &NopConsumer).unwrap();
  bowl.commit().unwrap();

  assert_eq!(read(out_dir.path(), "keep.txt"), read(new_dir.path(), "keep.txt"));
  assert_eq!(read(out_dir.path(), "grow.txt"), read(new_dir.path(), "grow.txt"));

  // The reconstructed tree verifies clean against a signature of the
  // intended new build: a fresh bowl has no prior history, so any
  // mismatch here would be this crate's fault, not pre-existing corruption.
  let new_sig_bytes = signature_bytes(&new_container, &new_pool);
  let mut new_sig_reader = BufReader::new(new_sig_bytes.as_slice());
  let mut new_signature = Signature::read(&mut new_sig_reader).unwrap();
  new_signature.assert_valid(out_dir.path(), Blame::Patch, |_| {}).unwrap();
}

/// A whole-file rename (same bytes, different path) is diffed as a
/// literal copy and applied through `Bowl::transpose` rather than being
/// rewritten: renaming a file must not require shipping its bytes again.
#[test]
fn whole_file_rename_uses_transpose() {
  let old_dir = tempfile::tempdir().unwrap();
  let new_dir = tempfile::tempdir().unwrap();
  let out_dir = tempfile::tempdir().unwrap();

  let payload = b"contents that move to a new path but never change";
  write(old_dir.path(), "old_name.bin", payload);
  write(new_dir.path(), "new_name.bin", payload);

  let old_container = container(vec![file("old_name.bin", payload.len() as i64)]);
  let new_container = container(vec![file("new_name.bin", payload.len() as i64)]);

  let old_pool = FsPool::new(&old_container, old_dir.path());
  let new_pool = FsPool::new(&new_container, new_dir.path());

  let sig_bytes = signature_bytes(&old_container, &old_pool);
  let patch = patch_bytes(&new_container, &sig_bytes, &new_pool);

  let mut patch_reader = BufReader::new(patch.as_slice());
  let mut decoded = Patch::read(&mut patch_reader).unwrap();

  let mut bowl = FreshBowl::new(&new_container, &old_pool, out_dir.path());
  decoded.apply(&old_pool, &mut bowl, &NopConsumer).unwrap();
  bowl.commit().unwrap();

  assert_eq!(read(out_dir.path(), "new_name.bin"), payload);
}

/// Scenario: applying a patch in place through `OverlayBowl` leaves files
/// the patch never touches untouched. If one of those untouched files was
/// already corrupt on disk before the patch ran, post-apply verification
/// against a known-good signature must blame the pre-existing install,
/// not the patch (spec §4.5.2, §7).
#[test]
fn overlay_apply_blames_preexisting_corruption() {
  let old_dir = tempfile::tempdir().unwrap();
  let new_source_dir = tempfile::tempdir().unwrap();
  let target_dir = tempfile::tempdir().unwrap();
  let stage_dir = tempfile::tempdir().unwrap();

  let keep_contents = b"this file is never modified by the patch at all";

  write(old_dir.path(), "keep.txt", keep_contents);
  write(old_dir.path(), "shrink.txt", b"this file will be replaced with something else entirely");

  write(new_source_dir.path(), "keep.txt", keep_contents);
  write(new_source_dir.path(), "shrink.txt", b"new");

  let old_container = container(vec![
    file("keep.txt", keep_contents.len() as i64),
    file("shrink.txt", "this file will be replaced with something else entirely".len() as i64),
  ]);
  let new_container = container(vec![file("keep.txt", keep_contents.len() as i64), file("shrink.txt", 3)]);

  let old_pool = FsPool::new(&old_container, old_dir.path());
  let new_source_pool = FsPool::new(&new_container, new_source_dir.path());

  let sig_bytes = signature_bytes(&old_container, &old_pool);
  let patch = patch_bytes(&new_container, &sig_bytes, &new_source_pool);

  // Set up the on-disk installation the patch will be applied against,
  // then corrupt the file the patch isn't going to touch.
  write(target_dir.path(), "keep.txt", keep_contents);
  write(target_dir.path(), "shrink.txt", b"this file will be replaced with something else entirely");
  write(target_dir.path(), "keep.txt", b"THIS byte-for-byte DIFFERENT corrupted content, same length!!!!");

  let target_pool = FsPool::new(&old_container, target_dir.path());

  let mut patch_reader = BufReader::new(patch.as_slice());
  let mut decoded = Patch::read(&mut patch_reader).unwrap();

  let mut bowl = OverlayBowl::new(&new_container, &old_container, &target_pool, target_dir.path(), stage_dir.path()).unwrap();
  decoded.apply(&target_pool, &mut bowl, &NopConsumer).unwrap();
  bowl.commit().unwrap();

  // The patch's own work is correct...
  assert_eq!(read(target_dir.path(), "shrink.txt"), b"new");

  // ...but the untouched file was already corrupt, and the patch must
  // not be blamed for that when checked against the known-good signature.
  let new_sig_bytes = signature_bytes(&new_container, &new_source_pool);
  let mut new_sig_reader = BufReader::new(new_sig_bytes.as_slice());
  let mut new_signature = Signature::read(&mut new_sig_reader).unwrap();

  let err = new_signature
    .assert_valid(target_dir.path(), Blame::PreExistingCorruption, |_| {})
    .unwrap_err();

  match err {
    wharf_patch::Error::CorruptTarget { file, .. } => assert_eq!(file, 0),
    other => panic!("expected CorruptTarget, got {other:?}"),
  }
}

/// Scenario: a patch that adds a new file and removes one that no longer
/// exists in the new build, applied in place.
#[test]
fn overlay_apply_adds_and_removes_files() {
  let old_dir = tempfile::tempdir().unwrap();
  let new_source_dir = tempfile::tempdir().unwrap();
  let target_dir = tempfile::tempdir().unwrap();
  let stage_dir = tempfile::tempdir().unwrap();

  write(old_dir.path(), "removed.txt", b"this file is gone in the new build");
  write(new_source_dir.path(), "added.txt", b"this file is brand new in this build");

  let old_container = container(vec![file("removed.txt", "this file is gone in the new build".len() as i64)]);
  let new_container = container(vec![file("added.txt", "this file is brand new in this build".len() as i64)]);

  let old_pool = FsPool::new(&old_container, old_dir.path());
  let new_source_pool = FsPool::new(&new_container, new_source_dir.path());

  let sig_bytes = signature_bytes(&old_container, &old_pool);
  let patch = patch_bytes(&new_container, &sig_bytes, &new_source_pool);

  write(target_dir.path(), "removed.txt", b"this file is gone in the new build");

  let target_pool = FsPool::new(&old_container, target_dir.path());

  let mut patch_reader = BufReader::new(patch.as_slice());
  let mut decoded = Patch::read(&mut patch_reader).unwrap();

  let mut bowl = OverlayBowl::new(&new_container, &old_container, &target_pool, target_dir.path(), stage_dir.path()).unwrap();
  decoded.apply(&target_pool, &mut bowl, &NopConsumer).unwrap();
  bowl.commit().unwrap();

  assert_eq!(read(target_dir.path(), "added.txt"), b"this file is brand new in this build");
  assert!(!target_dir.path().join("removed.txt").exists());
}

/// Property 7 (spec §8): an empty file still gets one block of signature
/// (the "empty hash" convention, see `hasher.rs`), and a zero-byte file
/// round-trips correctly through the full pipeline.
#[test]
fn empty_file_round_trips() {
  let old_dir = tempfile::tempdir().unwrap();
  let new_dir = tempfile::tempdir().unwrap();
  let out_dir = tempfile::tempdir().unwrap();

  write(old_dir.path(), "empty.txt", b"");
  write(new_dir.path(), "empty.txt", b"");

  let old_container = container(vec![file("empty.txt", 0)]);
  let new_container = container(vec![file("empty.txt", 0)]);

  assert_eq!(old_container.file_blocks(), 1);

  let old_pool = FsPool::new(&old_container, old_dir.path());
  let new_pool = FsPool::new(&new_container, new_dir.path());

  let sig_bytes = signature_bytes(&old_container, &old_pool);
  let patch = patch_bytes(&new_container, &sig_bytes, &new_pool);

  let mut patch_reader = BufReader::new(patch.as_slice());
  let mut decoded = Patch::read(&mut patch_reader).unwrap();

  let mut bowl = FreshBowl::new(&new_container, &old_pool, out_dir.path());
  decoded.apply(&old_pool, &mut bowl, &NopConsumer).unwrap();
  bowl.commit().unwrap();

  assert_eq!(read(out_dir.path(), "empty.txt"), Vec::<u8>::new());
}

/// Scenario 3 (spec §8): renaming files in place through `OverlayBowl`
/// must not delete the renamed-from path before the rename runs. The old
/// path has no exact counterpart in the new container (its name changed),
/// so it would otherwise be caught by the "absent from new build" delete
/// step that runs before the rename step in commit order (spec §4.5.2/§5).
#[test]
fn overlay_apply_moves_files_in_place() {
  let old_dir = tempfile::tempdir().unwrap();
  let new_source_dir = tempfile::tempdir().unwrap();
  let target_dir = tempfile::tempdir().unwrap();
  let stage_dir = tempfile::tempdir().unwrap();

  let payload_a = b"first file that moves to a new directory";
  let payload_b = b"second file that moves to a new directory";

  write(old_dir.path(), "old/a.bin", payload_a);
  write(old_dir.path(), "old/b.bin", payload_b);
  write(new_source_dir.path(), "new/a.bin", payload_a);
  write(new_source_dir.path(), "new/b.bin", payload_b);

  let old_container = container(vec![file("old/a.bin", payload_a.len() as i64), file("old/b.bin", payload_b.len() as i64)]);
  let new_container = container(vec![file("new/a.bin", payload_a.len() as i64), file("new/b.bin", payload_b.len() as i64)]);

  let old_pool = FsPool::new(&old_container, old_dir.path());
  let new_source_pool = FsPool::new(&new_container, new_source_dir.path());

  let sig_bytes = signature_bytes(&old_container, &old_pool);
  let patch = patch_bytes(&new_container, &sig_bytes, &new_source_pool);

  write(target_dir.path(), "old/a.bin", payload_a);
  write(target_dir.path(), "old/b.bin", payload_b);

  let target_pool = FsPool::new(&old_container, target_dir.path());

  let mut patch_reader = BufReader::new(patch.as_slice());
  let mut decoded = Patch::read(&mut patch_reader).unwrap();

  let mut bowl = OverlayBowl::new(&new_container, &old_container, &target_pool, target_dir.path(), stage_dir.path()).unwrap();
  decoded.apply(&target_pool, &mut bowl, &NopConsumer).unwrap();
  bowl.commit().unwrap();

  assert_eq!(read(target_dir.path(), "new/a.bin"), payload_a);
  assert_eq!(read(target_dir.path(), "new/b.bin"), payload_b);
  assert!(!target_dir.path().join("old/a.bin").exists());
  assert!(!target_dir.path().join("old/b.bin").exists());
}

fn pseudo_random_bytes(seed: u64, len: usize) -> Vec<u8> {
  let mut rng = StdRng::seed_from_u64(seed);
  let mut bytes = vec![0u8; len];
  rng.fill_bytes(&mut bytes);
  bytes
}

/// Scenario 1 (spec §8, "change-one"), exercised across multiple blocks:
/// an unchanged leading block, a changed middle block, and an unchanged
/// trailing block. The diff engine must emit `BLOCK_RANGE`/`DATA` ops in
/// the same byte order the file actually has (leading run, then the
/// literal middle, then the trailing run) — a run flushed out of order
/// around an intervening literal would reconstruct the file with its
/// blocks transposed instead of a byte-identical copy. Every file used
/// by the other tests in this module is smaller than `BLOCK_SIZE` and so
/// never exercises the block-matching loop at all.
#[test]
fn multi_block_change_one_round_trips() {
  let old_dir = tempfile::tempdir().unwrap();
  let new_dir = tempfile::tempdir().unwrap();
  let out_dir = tempfile::tempdir().unwrap();

  let block = BLOCK_SIZE as usize;
  let leading = pseudo_random_bytes(1, block);
  let trailing = pseudo_random_bytes(2, block);
  let old_middle = pseudo_random_bytes(3, block);
  let new_middle = pseudo_random_bytes(4, block);

  let mut old_bytes = leading.clone();
  old_bytes.extend_from_slice(&old_middle);
  old_bytes.extend_from_slice(&trailing);

  let mut new_bytes = leading.clone();
  new_bytes.extend_from_slice(&new_middle);
  new_bytes.extend_from_slice(&trailing);

  write(old_dir.path(), "change-one.bin", &old_bytes);
  write(new_dir.path(), "change-one.bin", &new_bytes);

  let old_container = container(vec![file("change-one.bin", old_bytes.len() as i64)]);
  let new_container = container(vec![file("change-one.bin", new_bytes.len() as i64)]);

  let old_pool = FsPool::new(&old_container, old_dir.path());
  let new_pool = FsPool::new(&new_container, new_dir.path());

  let sig_bytes = signature_bytes(&old_container, &old_pool);
  let patch = patch_bytes(&new_container, &sig_bytes, &new_pool);

  let mut patch_reader = BufReader::new(patch.as_slice());
  let mut decoded = Patch::read(&mut patch_reader).unwrap();

  let mut bowl = FreshBowl::new(&new_container, &old_pool, out_dir.path());
  decoded.apply(&old_pool, &mut bowl, &NopConsumer).unwrap();
  bowl.commit().unwrap();

  assert_eq!(read(out_dir.path(), "change-one.bin"), new_bytes);
}

/// Scenario 2 (spec §8, "one-became-short"/grown): a file of exactly one
/// block grows by a few trailing bytes, with the original block
/// untouched. The run covering the unchanged leading block must come
/// before the trailing literal in the emitted ops, not after — applying
/// them in the wrong order reconstructs the grown bytes before the
/// original block instead of after it.
#[test]
fn multi_block_prefix_unchanged_suffix_grows_round_trips() {
  let old_dir = tempfile::tempdir().unwrap();
  let new_dir = tempfile::tempdir().unwrap();
  let out_dir = tempfile::tempdir().unwrap();

  let block = BLOCK_SIZE as usize;
  let leading = pseudo_random_bytes(5, block);
  let grown_tail = pseudo_random_bytes(6, 17);

  let old_bytes = leading.clone();
  let mut new_bytes = leading.clone();
  new_bytes.extend_from_slice(&grown_tail);

  write(old_dir.path(), "short.bin", &old_bytes);
  write(new_dir.path(), "short.bin", &new_bytes);

  let old_container = container(vec![file("short.bin", old_bytes.len() as i64)]);
  let new_container = container(vec![file("short.bin", new_bytes.len() as i64)]);

  let old_pool = FsPool::new(&old_container, old_dir.path());
  let new_pool = FsPool::new(&new_container, new_dir.path());

  let sig_bytes = signature_bytes(&old_container, &old_pool);
  let patch = patch_bytes(&new_container, &sig_bytes, &new_pool);

  let mut patch_reader = BufReader::new(patch.as_slice());
  let mut decoded = Patch::read(&mut patch_reader).unwrap();

  let mut bowl = FreshBowl::new(&new_container, &old_pool, out_dir.path());
  decoded.apply(&old_pool, &mut bowl, &NopConsumer).unwrap();
  bowl.commit().unwrap();

  assert_eq!(read(out_dir.path(), "short.bin"), new_bytes);
}
