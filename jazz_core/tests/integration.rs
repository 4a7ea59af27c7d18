use jazz_core::config::{Config, ConfigBuilder, Instrument};
use jazz_core::smf::encode_to_bytes;
use jazz_core::tracker::ParsedTrack;
use jazz_core::{StreamParser, TrackerStep};

fn config_for(bars: u32) -> Config {
    let mut builder = ConfigBuilder::default();
    builder.bars_per_generation = bars;
    builder.ticks_per_beat = 480;
    builder.swing_ratio = 0.67;
    Config::new(builder)
}

fn parse_full(config: &Config, text: &str) -> Vec<ParsedTrack> {
    let mut parser = StreamParser::new(config);
    parser.append_chunk(text);
    parser.finalize();
    let events = parser.drain_events();

    let mut tracks: Vec<ParsedTrack> = Instrument::ALL
        .iter()
        .map(|&instrument| ParsedTrack { instrument, steps: Vec::new() })
        .collect();
    for event in events {
        let track = tracks.iter_mut().find(|t| t.instrument == event.instrument).unwrap();
        track.steps.push(event.step);
    }
    tracks
}

#[test]
fn full_quartet_parses_and_encodes_deterministically() {
    let config = config_for(1);
    let text = "\
BASS
1 C2:80
2 .
3 E2:75
4 ^
DRUMS
1 C2:90,D#3:60
2 .
3 .
4 .
PIANO
1 C3:65,E3:60,G3:62
2 .
3 .
4 .
SAX
1 E4:85
2 ^
3 .
4 .
";
    let tracks = parse_full(&config, text);
    assert_eq!(tracks[0].steps.len(), 4);

    let bytes_a = encode_to_bytes(&config, &tracks);
    let bytes_b = encode_to_bytes(&config, &tracks);
    assert_eq!(bytes_a, bytes_b, "encoding must be deterministic for identical input");
    assert_eq!(&bytes_a[0..4], b"MThd");
}

#[test]
fn malformed_velocity_skips_but_continues_counting_from_next_valid_line() {
    let config = config_for(1);
    let text = "BASS\n1 C2:abc\n2 D2:80\n";
    let mut parser = StreamParser::new(&config);
    parser.append_chunk(text);
    parser.finalize();
    let events = parser.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].step_index, 0);
}

#[test]
fn stream_chunk_boundary_reassembles_split_tokens() {
    let config = config_for(1);
    let mut parser = StreamParser::new(&config);
    parser.append_chunk("BASS\n1 C2");
    parser.append_chunk(":80\n2 .\n");
    parser.finalize();
    let events = parser.drain_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0].step, TrackerStep::Notes(_)));
    assert!(events[1].step.is_rest());
}
