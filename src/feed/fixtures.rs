//! Upstream documents shared by unit tests.

pub(crate) const UPSTREAM_NEW_FEED_URL: &str =
    "https://feeds.podcastics.com/podcastics/podcasts/rss/7543_22adb373093deb54e1ec644c2a7adec7.rss";

pub(crate) const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"
     xmlns:podcast="https://podcastindex.org/namespace/1.0">
  <channel>
    <title>Test</title>

	<itunes:new-feed-url>https://feeds.podcastics.com/podcastics/podcasts/rss/7543_22adb373093deb54e1ec644c2a7adec7.rss</itunes:new-feed-url>

    <item>
      <title>KEEP ME</title>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
      <itunes:episode>12</itunes:episode>
      <itunes:duration>9:59</itunes:duration>
      <description><![CDATA[<p>Hello <strong>world</strong></p>]]></description>
      <enclosure url="https://example.com/audio.mp3" type="audio/mpeg"/>
      <itunes:image href="https://example.com/image.png"/>
      <podcast:person role="host">Alice</podcast:person>
    </item>

    <item>
      <title><![CDATA[CDATA KEEP]]></title>
      <itunes:duration>10:01</itunes:duration>
    </item>

    <item>
      <title>Fish &amp; Chips</title>
      <itunes:episode>641</itunes:episode>
    </item>

    <item>
      <title>DROP ME</title>
      <description><![CDATA[<p>Should not appear</p>]]></description>
    </item>

  </channel>
</rss>
"#;
