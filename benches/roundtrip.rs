//! Backup/restore throughput over a small generated tree.

use arkive::backup::{backup, BackupOptions};
use arkive::crypto::KdfParams;
use arkive::extract::{restore, RestoreOptions};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const FILES: usize = 64;
const FILE_SIZE: usize = 64 * 1024;

/// Half random bytes, half repeated text, so the compressor has some work to do.
fn populate(root: &Path) {
    let mut rng = StdRng::seed_from_u64(7);
    for i in 0..FILES {
        let dir = root.join(format!("d{}", i % 8));
        fs::create_dir_all(&dir).unwrap();
        let mut data = vec![0u8; FILE_SIZE / 2];
        rng.fill(&mut data[..]);
        data.extend(b"lorem ipsum dolor sit amet ".iter().cycle().take(FILE_SIZE / 2));
        fs::write(dir.join(format!("f{i}.bin")), data).unwrap();
    }
}

fn bench_roundtrip(c: &mut Criterion) {
    let work = tempdir().unwrap();
    let src = work.path().join("src");
    populate(&src);
    let kdf = KdfParams { m_cost: 1024, t_cost: 1, p_cost: 1 };

    let mut group = c.benchmark_group("roundtrip");
    group.throughput(Throughput::Bytes((FILES * FILE_SIZE) as u64));
    group.sample_size(10);

    for (name, passphrase) in [("plain", None), ("encrypted", Some("bench"))] {
        let archive = work.path().join(format!("{name}.ark"));
        let mut options = BackupOptions::new(&src, &archive).kdf(kdf);
        options.passphrase = passphrase.map(String::from);

        group.bench_function(format!("backup/{name}"), |b| {
            b.iter(|| backup(&options).unwrap());
        });

        let mut restore_options = RestoreOptions::new(&archive, work.path().join(format!("out-{name}")));
        restore_options.passphrase = passphrase.map(String::from);
        group.bench_function(format!("restore/{name}"), |b| {
            b.iter(|| restore(&restore_options).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_roundtrip);
criterion_main!(benches);
