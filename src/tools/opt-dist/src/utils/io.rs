use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_extra::dir::CopyOptions;
use std::fs::File;

/// Delete and re-create the directory.
pub fn reset_directory(path: &Utf8Path) -> anyhow::Result<()> {
    log::info!("Resetting directory {path}");
    let _ = std::fs::remove_dir_all(path.as_std_path());
    std::fs::create_dir_all(path.as_std_path())
        .with_context(|| format!("Cannot create directory {path}"))?;
    Ok(())
}

/// Copies the content of `src` into `dst`, creating `dst` if needed.
pub fn copy_directory(src: &Utf8Path, dst: &Utf8Path) -> anyhow::Result<()> {
    log::info!("Copying directory {src} to {dst}");
    std::fs::create_dir_all(dst.as_std_path())?;
    fs_extra::dir::copy(src, dst, &CopyOptions::default().content_only(true).overwrite(true))
        .with_context(|| format!("Cannot copy directory {src} to {dst}"))?;
    Ok(())
}

/// Moves the content of `src` into `dst`, creating `dst` if needed.
pub fn move_directory(src: &Utf8Path, dst: &Utf8Path) -> anyhow::Result<()> {
    log::info!("Moving directory {src} to {dst}");
    std::fs::create_dir_all(dst.as_std_path())?;
    fs_extra::dir::move_dir(src, dst, &CopyOptions::default().content_only(true))
        .with_context(|| format!("Cannot move directory {src} to {dst}"))?;
    Ok(())
}

/// Counts all files below a directory, recursively.
pub fn count_files(dir: &Utf8Path) -> anyhow::Result<u64> {
    let content = fs_extra::dir::get_dir_content(dir)
        .with_context(|| format!("Cannot list directory {dir}"))?;
    Ok(content.files.len() as u64)
}

/// Size of a file, or the total size of all files inside a directory.
pub fn get_path_size(path: &Utf8Path) -> anyhow::Result<u64> {
    let size = fs_extra::dir::get_size(path).with_context(|| format!("Cannot stat {path}"))?;
    Ok(size)
}

/// Returns all files whose path starts with `prefix`, sorted.
///
/// Equivalent to the shell glob `<prefix>*`.
pub fn get_files_with_prefix(prefix: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let pattern = format!("{}*", glob::Pattern::escape(prefix.as_str()));
    let mut files = vec![];
    for entry in glob::glob(&pattern)? {
        let path = Utf8PathBuf::from_path_buf(entry?)
            .map_err(|path| anyhow::anyhow!("Non UTF-8 path {}", path.display()))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Total size of all files beginning with `prefix` (`du -sh <prefix>*`).
pub fn get_path_prefix_size(prefix: &Utf8Path) -> anyhow::Result<u64> {
    let mut size = 0;
    for file in get_files_with_prefix(prefix)? {
        size += std::fs::metadata(file.as_std_path())?.len();
    }
    Ok(size)
}

pub fn delete_directory(path: &Utf8Path) -> anyhow::Result<()> {
    log::info!("Deleting directory `{path}`");
    std::fs::remove_dir_all(path.as_std_path())
        .context(format!("Cannot remove directory {path}"))?;
    Ok(())
}

pub fn delete_file(path: &Utf8Path) -> anyhow::Result<()> {
    log::info!("Deleting file `{path}`");
    std::fs::remove_file(path.as_std_path()).context(format!("Cannot remove file {path}"))?;
    Ok(())
}

pub fn unpack_archive(path: &Utf8Path, dest_dir: &Utf8Path) -> anyhow::Result<()> {
    log::info!("Unpacking directory `{path}` into `{dest_dir}`");

    assert!(path.as_str().ends_with(".tar.xz"));
    let file = File::open(path.as_std_path()).with_context(|| format!("Cannot open {path}"))?;
    let file = xz::read::XzDecoder::new(file);
    let mut archive = tar::Archive::new(file);
    archive.unpack(dest_dir.as_std_path())?;
    Ok(())
}

pub fn unpack_zip(path: &Utf8Path, dest_dir: &Utf8Path) -> anyhow::Result<()> {
    log::info!("Unpacking zip `{path}` into `{dest_dir}`");

    let file = File::open(path.as_std_path()).with_context(|| format!("Cannot open {path}"))?;
    let mut archive = zip::ZipArchive::new(file)?;
    archive.extract(dest_dir.as_std_path())?;
    Ok(())
}

/// Returns the files directly inside `dir`, optionally only those ending with `suffix`.
pub fn get_files_from_dir(
    dir: &Utf8Path,
    suffix: Option<&str>,
) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let mut files = vec![];
    for entry in std::fs::read_dir(dir.as_std_path())
        .with_context(|| format!("Cannot read directory {dir}"))?
    {
        let path = Utf8PathBuf::from_path_buf(entry?.path())
            .map_err(|path| anyhow::anyhow!("Non UTF-8 path {}", path.display()))?;
        if !path.is_file() {
            continue;
        }
        if suffix.map_or(true, |suffix| path.as_str().ends_with(suffix)) {
            files.push(path);
        }
    }
    Ok(files)
}
