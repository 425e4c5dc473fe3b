//! Benchmarks for motion decoding and merging

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use glam::{Quat, Vec3};

use xray_motion::{BoneTrack, Motion, MotionParams, OmfFile, OmfMotion, Report, merge_omf};

const BONES: usize = 40;
const FRAMES: u32 = 120;

fn create_test_file(prefix: &str, motions: usize) -> Vec<u8> {
    let names: Vec<String> = (0..BONES).map(|bone| format!("bone_{bone:02}")).collect();
    let motion = |index: usize| {
        let tracks = (0..BONES)
            .map(|bone| {
                let phase = bone as f32 * 0.1;
                let rotations: Vec<Quat> = (0..FRAMES)
                    .map(|f| Quat::from_rotation_y((f as f32 * 0.05 + phase).sin()))
                    .collect();
                let positions: Vec<Vec3> = (0..FRAMES)
                    .map(|f| Vec3::new(0.0, (f as f32 * 0.1).cos(), phase))
                    .collect();
                BoneTrack::from_samples(&rotations, &positions, bone % 2 == 0)
            })
            .collect();
        OmfMotion::new(Motion {
            name: format!("{prefix}_{index}"),
            length: FRAMES,
            tracks,
        })
    };

    OmfFile {
        params_version: 4,
        parts: MotionParams::default_parts(&names),
        motions: (0..motions).map(motion).collect(),
    }
    .write()
    .expect("benchmark file encodes")
}

fn bench_decode(c: &mut Criterion) {
    let data = create_test_file("walk", 8);
    c.bench_function("omf_read", |b| {
        b.iter(|| {
            let mut report = Report::new();
            OmfFile::read(black_box(&data), &mut report).expect("benchmark file decodes")
        })
    });
}

fn bench_merge(c: &mut Criterion) {
    let a = create_test_file("walk", 8);
    let b = create_test_file("run", 8);
    c.bench_function("omf_merge", |bench| {
        bench.iter(|| merge_omf(black_box(&[&a, &b])).expect("benchmark files merge"))
    });
}

criterion_group!(benches, bench_decode, bench_merge);
criterion_main!(benches);
