//! Benchmarks for the moldb indexer and views
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use moldb::query::{EntryFilter, FilterComparisonType};
use moldb::storage::{keys, Entry, IndexEntry, PropertyBag, XmlSnapshotStore};
use moldb::{Catalog, Config};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const ELEMENTS: [&str; 5] = ["C", "N", "O", "S", "H"];

fn write_xyz_folder(dir: &Path, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let atoms = 5 + i % 50;
        let mut text = format!("{}\nmolecule {}\n", atoms, i);
        for a in 0..atoms {
            text.push_str(&format!("{} {}.0 0.0 0.0\n", ELEMENTS[a % ELEMENTS.len()], a));
        }
        fs::write(dir.join(format!("mol{:05}.xyz", i)), text).unwrap();
    }
}

fn open_catalog(root: &TempDir) -> Catalog {
    let mut config = Config::default();
    config.storage.root_dir = root.path().join("catalog");
    Catalog::open(&config).unwrap()
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    group.sample_size(10);

    for size in [100, 1000] {
        let source = tempdir().unwrap();
        write_xyz_folder(source.path(), size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("initial_{}", size), |b| {
            b.iter_batched(
                || {
                    let root = tempdir().unwrap();
                    let catalog = open_catalog(&root);
                    let db = catalog.databases().create_database("bench", None, None).unwrap();
                    (root, db)
                },
                |(_root, db)| db.update_from_folder(black_box(source.path())).unwrap(),
                BatchSize::PerIteration,
            )
        });

        let root = tempdir().unwrap();
        let catalog = open_catalog(&root);
        let db = catalog.databases().create_database("bench", None, None).unwrap();
        db.update_from_folder(source.path()).unwrap();

        group.bench_function(format!("unchanged_{}", size), |b| {
            b.iter(|| db.update_from_folder(black_box(source.path())).unwrap())
        });
    }

    group.finish();
}

fn bench_snapshot_encoding(c: &mut Criterion) {
    let entries: Vec<IndexEntry> = (0..10_000)
        .map(|i| {
            let mut bag = PropertyBag::new();
            bag.insert(keys::ATOM_COUNT, (i % 300) as i64);
            bag.insert(keys::ATOM_TYPES, vec!["C".to_string(), "N".to_string(), "O".to_string()]);
            IndexEntry::new(Entry::new(format!("e{:05}", i), ".pdb", 1 + (i % 3) as u32), None, bag)
        })
        .collect();

    let mut group = c.benchmark_group("index_store");
    group.throughput(Throughput::Elements(entries.len() as u64));
    group.bench_function("encode_10000", |b| {
        b.iter(|| XmlSnapshotStore::encode(1, black_box(&entries)).unwrap())
    });
    group.finish();
}

fn bench_view(c: &mut Criterion) {
    let source = tempdir().unwrap();
    write_xyz_folder(source.path(), 1000);

    let root = tempdir().unwrap();
    let catalog = open_catalog(&root);
    let db = catalog.databases().create_database("bench", None, None).unwrap();
    db.update_from_folder(source.path()).unwrap();

    let view = catalog
        .views()
        .create_view(
            db.id(),
            "large",
            None,
            vec![EntryFilter::int("AtomCount", FilterComparisonType::NumberGreater, 30)],
        )
        .unwrap();
    view.snapshot().unwrap();

    let mut group = c.benchmark_group("view");
    group.bench_function("cached_snapshot", |b| b.iter(|| view.snapshot().unwrap()));
    group.bench_function("live_filter", |b| b.iter(|| view.filter(&[]).unwrap()));
    group.finish();
}

criterion_group!(benches, bench_update, bench_snapshot_encoding, bench_view);
criterion_main!(benches);
