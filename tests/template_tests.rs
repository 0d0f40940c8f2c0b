//! Template tree rendering tests.

mod helpers;

use std::fs;
use tempfile::TempDir;

use helpers::assert_file_contains;
use stagebuild::template::{render_tree, Context};

fn ctx() -> Context {
    let mut ctx = Context::new();
    ctx.insert("arch", "amd64");
    ctx.insert("cores", 8u64);
    ctx
}

#[test]
fn test_tmpl_suffix_is_stripped_and_rendered() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::create_dir_all(src.path().join("etc/portage")).unwrap();
    fs::write(
        src.path().join("etc/portage/make.conf.tmpl"),
        "MAKEOPTS=\"-j{{ cores }}\"\n",
    )
    .unwrap();

    render_tree(src.path(), dst.path(), &ctx()).unwrap();

    let rendered = dst.path().join("etc/portage/make.conf");
    assert_eq!(fs::read_to_string(rendered).unwrap(), "MAKEOPTS=\"-j8\"\n");
    assert!(!dst.path().join("etc/portage/make.conf.tmpl").exists());
}

#[test]
fn test_plain_files_are_copied_verbatim() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let raw = "{{ arch }} stays literal\n";
    fs::write(src.path().join("locale.gen"), raw).unwrap();

    render_tree(src.path(), dst.path(), &ctx()).unwrap();

    assert_eq!(fs::read_to_string(dst.path().join("locale.gen")).unwrap(), raw);
}

#[test]
fn test_clean_sentinel_wipes_destination() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let pkg_use = src.path().join("package.use");
    fs::create_dir_all(&pkg_use).unwrap();
    fs::write(pkg_use.join(".clean"), "").unwrap();
    fs::write(pkg_use.join("base.tmpl"), "*/* {{ arch }}\n").unwrap();

    let out = dst.path().join("package.use");
    fs::create_dir_all(out.join("leftover-dir")).unwrap();
    fs::write(out.join("stale"), "old").unwrap();

    render_tree(src.path(), dst.path(), &ctx()).unwrap();
    let first: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(first, ["base"]);

    render_tree(src.path(), dst.path(), &ctx()).unwrap();
    assert_file_contains(&out.join("base"), "*/* amd64");
    assert!(!out.join(".clean").exists());
}

#[test]
fn test_without_sentinel_existing_files_survive() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("hostname.tmpl"), "{{ arch }}-builder\n").unwrap();
    fs::write(dst.path().join("fstab"), "keep").unwrap();

    render_tree(src.path(), dst.path(), &ctx()).unwrap();

    assert_eq!(fs::read_to_string(dst.path().join("fstab")).unwrap(), "keep");
    assert_file_contains(&dst.path().join("hostname"), "amd64-builder");
}

#[test]
fn test_single_file_renders_to_destination_path() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let template = src.path().join("genkernel.conf.tmpl");
    fs::write(&template, "MAKEOPTS=\"-j{{ cores }}\"\n").unwrap();
    let out = dst.path().join("etc/genkernel.conf");

    render_tree(&template, &out, &ctx()).unwrap();

    assert_file_contains(&out, "-j8");
}

#[test]
fn test_render_error_aborts() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("broken.tmpl"), "{% if build %}never closed").unwrap();

    assert!(render_tree(src.path(), dst.path(), &ctx()).is_err());
}
