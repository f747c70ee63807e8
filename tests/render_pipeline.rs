use asciivid::frames::{list_frames, Frame};
use asciivid::pipeline::render_frames;
use asciivid::{FrameRenderer, Progress, Scheduler, SchedulerOptions};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn scheduler(max_workers: usize) -> Scheduler {
    Scheduler::new(SchedulerOptions {
        max_workers,
        poll_interval: Duration::from_millis(1),
        stall_timeout: Some(Duration::from_secs(60)),
    })
    .unwrap()
}

/// Frame `k` gets its own color so outputs can be traced back to inputs.
fn source_frame(k: usize) -> RgbImage {
    let mut img = RgbImage::from_pixel(24, 24, Rgb([0, 0, 0]));
    let shade = (k * 20 % 256) as u8;
    for (x, y, p) in img.enumerate_pixels_mut() {
        if (x / 8 + y / 12) % 2 == 0 {
            *p = Rgb([shade, 255 - shade, (k * 7 % 256) as u8]);
        }
    }
    img
}

fn write_frames(dir: &Path, count: usize) -> Vec<RgbImage> {
    (0..count)
        .map(|k| {
            let img = source_frame(k);
            img.save(dir.join(format!("{:08}.png", k + 1))).unwrap();
            img
        })
        .collect()
}

#[test]
fn every_frame_is_rendered_from_its_own_source() {
    let dir = tempdir().unwrap();
    let sources = write_frames(dir.path(), 12);
    let renderer = Arc::new(FrameRenderer::builtin().unwrap());

    let report = render_frames(
        &scheduler(3),
        Arc::clone(&renderer),
        list_frames(dir.path()),
        Arc::new(|_: Progress| {}),
    )
    .unwrap();

    assert_eq!(report.total, 12);
    assert_eq!(report.succeeded, 12);
    assert!(report.failures.is_empty());
    assert!(report.last_frame_done);

    let frames = list_frames(dir.path());
    assert_eq!(frames.len(), 12);
    for (frame, source) in frames.iter().zip(&sources) {
        let written = image::open(&frame.path).unwrap().to_rgb8();
        assert_eq!(written, renderer.render(source), "frame {}", frame.index);
    }
}

#[test]
fn a_broken_frame_does_not_stop_the_others() {
    let dir = tempdir().unwrap();
    write_frames(dir.path(), 5);
    let broken = dir.path().join("00000003.png");
    fs::write(&broken, b"definitely not a png").unwrap();

    let report = render_frames(
        &scheduler(2),
        Arc::new(FrameRenderer::builtin().unwrap()),
        list_frames(dir.path()),
        Arc::new(|_: Progress| {}),
    )
    .unwrap();

    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 2);
    assert!(report.failures[0].message.contains("00000003.png"));
    assert_eq!(fs::read(&broken).unwrap(), b"definitely not a png");
}

#[test]
fn hundred_frames_with_four_workers() {
    let dir = tempdir().unwrap();
    for k in 0..100 {
        RgbImage::from_pixel(16, 12, Rgb([k as u8, 200, 50]))
            .save(dir.path().join(format!("{:08}.png", k + 1)))
            .unwrap();
    }
    let renderer = Arc::new(FrameRenderer::builtin().unwrap());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let renders = Arc::new(AtomicUsize::new(0));

    let sched = scheduler(4);
    let budget = sched.budget();
    let (r, p, n) = (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&renders));
    let report = sched
        .run(
            list_frames(dir.path()),
            move |job: &asciivid::RenderJob<Frame>| {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                assert!(budget.in_flight() <= 4);
                let result = renderer.render_file(&job.item.path);
                n.fetch_add(1, Ordering::SeqCst);
                r.fetch_sub(1, Ordering::SeqCst);
                result
            },
            |_, _| {},
        )
        .unwrap();

    assert_eq!(report.succeeded, 100);
    assert_eq!(renders.load(Ordering::SeqCst), 100);
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert_eq!(list_frames(dir.path()).len(), 100);
}

#[test]
fn rendering_the_same_source_twice_is_byte_identical() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    let source = source_frame(9);
    source.save(&a).unwrap();
    source.save(&b).unwrap();

    let renderer = FrameRenderer::builtin().unwrap();
    renderer.render_file(&a).unwrap();
    renderer.render_file(&b).unwrap();
    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
}
