use std::io::Write;
use std::path::Path;

/// Write `data` to `path` atomically: write a sibling temp file, fsync,
/// then rename over the destination. Readers never observe a torn file.
pub fn atomic_write<P: AsRef<Path>>(path: P, data: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");

    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp, path)
}
