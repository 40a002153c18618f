// Integration tests for resource identity normalization
//
// Cosmetic URL variations must collapse to one identity so that the same
// content is never recorded twice.

use tabcast::normalize;

const CANONICAL_VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

#[test]
fn test_youtube_variants_share_identity() {
    let variants = [
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42s",
        "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&list=PL123",
        "https://m.youtube.com/watch?v=dQw4w9WgXcQ#comments",
        "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
        "https://youtu.be/dQw4w9WgXcQ?si=abcdef",
        "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        "https://www.youtube.com/embed/dQw4w9WgXcQ?autoplay=1",
        "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ",
        "  https://www.youtube.com/watch?v=dQw4w9WgXcQ  ",
    ];

    for raw in variants {
        assert_eq!(normalize(raw).as_str(), CANONICAL_VIDEO, "input: {}", raw);
    }
}

#[test]
fn test_different_videos_differ() {
    let a = normalize("https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    let b = normalize("https://www.youtube.com/watch?v=9bZkp7q19f0");
    assert_ne!(a, b);
}

#[test]
fn test_malformed_video_id_falls_back_to_generic() {
    let identity = normalize("https://www.youtube.com/watch?v=short");
    assert_eq!(identity.as_str(), "https://youtube.com/watch?v=short");
}

#[test]
fn test_bilibili_keeps_part_number() {
    assert_eq!(
        normalize("https://www.bilibili.com/video/BV1xx411c7mD/?spm_id_from=333.1007&p=1").as_str(),
        "https://www.bilibili.com/video/BV1xx411c7mD"
    );
    assert_eq!(
        normalize("https://m.bilibili.com/video/BV1xx411c7mD?p=3&vd_source=abc").as_str(),
        "https://www.bilibili.com/video/BV1xx411c7mD?p=3"
    );
}

#[test]
fn test_generic_urls_drop_tracking_and_fragment() {
    assert_eq!(
        normalize("https://www.Example.com/path/?b=2&a=1&utm_source=news&fbclid=xyz#top").as_str(),
        "https://example.com/path?a=1&b=2"
    );
    assert_eq!(normalize("https://example.com/").as_str(), "https://example.com");
    assert_eq!(
        normalize("http://localhost:8080/player").as_str(),
        "http://localhost:8080/player"
    );
}

#[test]
fn test_meaningful_query_is_kept() {
    let a = normalize("https://example.com/search?q=rust");
    let b = normalize("https://example.com/search?q=go");
    assert_ne!(a, b);
}

#[test]
fn test_normalizing_twice_is_stable() {
    for raw in [
        "https://www.example.com/a/b/?z=1&utm_medium=x&a=2",
        "https://youtu.be/dQw4w9WgXcQ",
        "https://www.bilibili.com/video/BV1xx411c7mD?p=2",
    ] {
        let once = normalize(raw);
        let twice = normalize(once.as_str());
        assert_eq!(once, twice, "input: {}", raw);
    }
}

#[test]
fn test_unparseable_input_is_returned_raw() {
    assert_eq!(normalize("not a url").as_str(), "not a url");
    assert_eq!(normalize("").as_str(), "");
}

#[test]
fn test_non_web_schemes_only_lose_fragment() {
    assert_eq!(
        normalize("file:///home/me/track.html#t=10").as_str(),
        "file:///home/me/track.html"
    );
}
