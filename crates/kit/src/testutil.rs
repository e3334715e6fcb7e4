//! Fixtures shared by unit tests.

use std::fs::File;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

pub fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let td = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(td.path().to_owned()).unwrap();
    (td, path)
}

fn append_entries<W: Write>(builder: &mut tar::Builder<W>, entries: &[(&str, &[u8])]) {
    for (name, data) in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
}

pub fn write_tar(path: &Utf8Path, entries: &[(&str, &[u8])]) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());
    append_entries(&mut builder, entries);
    builder.into_inner().unwrap().flush().unwrap();
}

pub fn write_tar_gz(path: &Utf8Path, entries: &[(&str, &[u8])]) {
    let encoder =
        flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_entries(&mut builder, entries);
    builder.into_inner().unwrap().finish().unwrap();
}

pub fn write_gzip(path: &Utf8Path, data: &[u8]) {
    let mut encoder =
        flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap();
}
