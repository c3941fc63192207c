use std::cell::{Cell, RefCell};
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageFormat, Rgba, RgbaImage};
use map_image_loader::style_images::{
    AnimationMode, DirectoryBundle, ImageConfig, ImageDescriptor, ImageError, ImageMetadata, ImageService,
    LoopState, RasterBuffer, StopReason, StyleHost,
};
use tokio::task::LocalSet;

#[derive(Default)]
struct TestStyle {
    loaded: Cell<bool>,
    installs: RefCell<Vec<(String, (u32, u32))>>,
}

impl TestStyle {
    fn loaded() -> Rc<Self> {
        let style = Self::default();
        style.loaded.set(true);
        Rc::new(style)
    }

    fn count(&self, name: &str) -> usize {
        self.installs.borrow().iter().filter(|(n, _)| n == name).count()
    }
}

impl StyleHost for TestStyle {
    fn is_style_loaded(&self) -> bool {
        self.loaded.get()
    }

    fn add_bitmap_image(&self, name: &str, bitmap: &RasterBuffer, _info: &ImageMetadata) -> Result<(), ImageError> {
        self.installs
            .borrow_mut()
            .push((name.to_string(), bitmap.dimensions()));
        Ok(())
    }
}

fn host_of(style: &Rc<TestStyle>) -> Weak<dyn StyleHost> {
    let weak: Weak<dyn StyleHost> = Rc::downgrade(style) as Weak<dyn StyleHost>;
    weak
}

fn fast_config() -> ImageConfig {
    ImageConfig {
        watchdog_interval_ms: 50,
        frame_interval_ms: 20,
        ..ImageConfig::default()
    }
}

fn solid(width: u32, height: u32, shade: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([shade, 255 - shade, shade / 2, 255]))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    solid(width, height, 90)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png failed");
    out.into_inner()
}

fn gif_bytes(width: u32, height: u32, frames: usize, delay_ms: u32) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite).expect("set repeat failed");
        for i in 0..frames {
            let frame = Frame::from_parts(
                solid(width, height, (i as u8).wrapping_mul(70)),
                0,
                0,
                Delay::from_numer_denom_ms(delay_ms, 1),
            );
            encoder.encode_frame(frame).expect("encode frame failed");
        }
    }
    out
}

fn write_fixture(dir: &tempfile::TempDir, name: &str, bytes: Vec<u8>) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).expect("write fixture failed");
    path.to_string_lossy().to_string()
}

fn serve_once(content_type: &'static str, body: Vec<u8>) -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
    let addr = listener.local_addr().expect("read local addr failed");

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept failed");
        let mut req_buf = [0u8; 1024];
        let _ = stream.read(&mut req_buf);

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            content_type,
            body.len()
        );
        stream.write_all(head.as_bytes()).expect("write headers failed");
        stream.write_all(&body).expect("write body failed");
        stream.flush().expect("flush failed");
    });

    (format!("http://127.0.0.1:{}/a.gif", addr.port()), server)
}

async fn pause(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test]
async fn local_png_is_notified_and_installed() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("create temp dir failed");
            let path = write_fixture(&dir, "pin.png", png_bytes(16, 24));
            let style = TestStyle::loaded();
            let service = ImageService::init(fast_config(), host_of(&style)).expect("service init failed");

            let received = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&received);
            let _sub = service.subscribe("pin", move |name, bitmap| {
                sink.borrow_mut().push((name.to_string(), bitmap.dimensions()));
            });

            let resolved = service
                .load_batch(vec![("pin".to_string(), ImageDescriptor::new("pin", path))])
                .await;

            assert_eq!(resolved.len(), 1);
            assert_eq!(resolved[0].bitmap.dimensions(), (16, 24));
            assert_eq!(*received.borrow(), vec![("pin".to_string(), (16, 24))]);
            assert_eq!(*style.installs.borrow(), vec![("pin".to_string(), (16, 24))]);
        })
        .await;
}

#[tokio::test]
async fn partial_failure_keeps_successes_and_completes_once() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("create temp dir failed");
            let style = TestStyle::loaded();
            let service = ImageService::init(fast_config(), host_of(&style)).expect("service init failed");

            let mut batch = Vec::new();
            for i in 0..5 {
                let name = format!("icon{}", i);
                let path = write_fixture(&dir, &format!("{}.png", name), png_bytes(8, 8));
                batch.push((name.clone(), ImageDescriptor::new(name, path)));
            }
            batch.push(("gone".to_string(), ImageDescriptor::new("gone", "/no/such/file.png")));
            batch.push(("junk".to_string(), ImageDescriptor::new("junk", "data:image/png;base64,@@@@")));

            let completions = Rc::new(Cell::new(0));
            let counter = Rc::clone(&completions);
            let resolved = service
                .submit(batch, Some(Box::new(move || counter.set(counter.get() + 1))))
                .await
                .expect("batch task failed");

            assert_eq!(resolved.len(), 5);
            assert!(resolved.iter().all(|r| r.name.starts_with("icon")));
            assert_eq!(completions.get(), 1);
            assert_eq!(style.count("gone"), 0);
        })
        .await;
}

#[tokio::test]
async fn gif_named_png_falls_back_to_static() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("create temp dir failed");
            let path = write_fixture(&dir, "badge.gif", png_bytes(9, 7));
            let style = TestStyle::loaded();
            let service = ImageService::init(fast_config(), host_of(&style)).expect("service init failed");

            let resolved = service
                .load_batch(vec![("gifford_icon".to_string(), ImageDescriptor::new("gifford_icon", path))])
                .await;

            assert_eq!(resolved.len(), 1);
            assert!(!resolved[0].animated);
            assert_eq!(resolved[0].bitmap.dimensions(), (9, 7));
            assert!(service.registry().animated_names().is_empty());
        })
        .await;
}

#[tokio::test]
async fn remote_gif_unregistered_before_first_tick_stops_quietly() {
    LocalSet::new()
        .run_until(async {
            let (url, server) = serve_once("image/gif", gif_bytes(6, 6, 3, 60));
            let style = TestStyle::loaded();
            let service = ImageService::init(fast_config(), host_of(&style)).expect("service init failed");

            let resolved = service
                .load_batch(vec![("anim".to_string(), ImageDescriptor::new("anim", url))])
                .await;
            server.join().expect("server thread panicked");

            assert_eq!(resolved.len(), 1);
            assert!(resolved[0].animated);
            let handle = service
                .registry()
                .unregister_animated("anim")
                .expect("animation should be registered");
            let installs_after_batch = style.count("anim");

            pause(250).await;
            assert_eq!(style.count("anim"), installs_after_batch);
            assert_eq!(handle.state(), LoopState::Stopped(StopReason::Unregistered));
        })
        .await;
}

#[tokio::test]
async fn resubmitting_an_animation_supersedes_the_old_loop() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("create temp dir failed");
            let path = write_fixture(&dir, "spin.gif", gif_bytes(4, 4, 2, 40));
            let style = TestStyle::loaded();
            let service = ImageService::init(fast_config(), host_of(&style)).expect("service init failed");

            let batch = || vec![("spin".to_string(), ImageDescriptor::new("spin", path.clone()))];
            service.load_batch(batch()).await;
            let first = service
                .registry()
                .animated_handle("spin")
                .expect("first animation registered");

            service.load_batch(batch()).await;
            pause(200).await;

            assert_eq!(first.state(), LoopState::Stopped(StopReason::Superseded));
            assert!(!service.registry().is_animated_registered("spin", Some(&first)));
            assert!(service.registry().is_animated_registered("spin", None));
            assert!(style.count("spin") > 2);
        })
        .await;
}

#[tokio::test]
async fn dropping_the_view_unwinds_animation_loops() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("create temp dir failed");
            let path = write_fixture(&dir, "spin.gif", gif_bytes(4, 4, 2, 40));
            let style = TestStyle::loaded();
            let service = ImageService::init(fast_config(), host_of(&style)).expect("service init failed");

            service
                .load_batch(vec![("spin".to_string(), ImageDescriptor::new("spin", path))])
                .await;
            let handle = service
                .registry()
                .animated_handle("spin")
                .expect("animation registered");
            drop(style);

            pause(200).await;
            assert_eq!(handle.state(), LoopState::Stopped(StopReason::HostGone));
            assert!(service.registry().animated_names().is_empty());
        })
        .await;
}

#[tokio::test]
async fn simple_mode_keeps_redrawing_until_teardown() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("create temp dir failed");
            let path = write_fixture(&dir, "tick.gif", gif_bytes(4, 4, 2, 500));
            let style = TestStyle::loaded();
            let config = ImageConfig {
                animation_mode: AnimationMode::Simple,
                ..fast_config()
            };
            let service = ImageService::init(config, host_of(&style)).expect("service init failed");

            service
                .load_batch(vec![("tick".to_string(), ImageDescriptor::new("tick", path))])
                .await;
            pause(150).await;
            assert!(style.count("tick") >= 3);

            service.teardown();
            pause(30).await;
            let frozen = style.count("tick");
            pause(120).await;
            assert_eq!(style.count("tick"), frozen);
        })
        .await;
}

#[tokio::test]
async fn bare_resource_names_resolve_through_the_bundle() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("create temp dir failed");
            write_fixture(&dir, "map_pin.png", png_bytes(5, 5));
            let bundle = Arc::new(DirectoryBundle::new(Some(PathBuf::from(dir.path())), None));
            let style = TestStyle::loaded();
            let service =
                ImageService::with_bundle(fast_config(), bundle, host_of(&style)).expect("service init failed");

            let resolved = service
                .load_batch(vec![
                    ("pin".to_string(), ImageDescriptor::new("pin", "Map-Pin")),
                    ("missing".to_string(), ImageDescriptor::new("missing", "no_such_resource")),
                ])
                .await;

            assert_eq!(resolved.len(), 1);
            assert_eq!(resolved[0].name, "pin");
            assert_eq!(resolved[0].bitmap.dimensions(), (5, 5));
        })
        .await;
}

#[tokio::test]
async fn unloaded_style_skips_install_but_result_is_returned() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("create temp dir failed");
            let path = write_fixture(&dir, "pin.png", png_bytes(3, 3));
            let style = Rc::new(TestStyle::default());
            let service = ImageService::init(fast_config(), host_of(&style)).expect("service init failed");

            let resolved = service
                .load_batch(vec![("pin".to_string(), ImageDescriptor::new("pin", path))])
                .await;

            assert_eq!(resolved.len(), 1);
            assert_eq!(style.count("pin"), 0);
        })
        .await;
}
