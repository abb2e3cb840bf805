use log::{debug, warn};

use crate::core::options::DemuxOptions;
use crate::core::packet::Packet;
use crate::core::source::ContainerInfo;
use crate::core::stream_info::{MediaType, StreamInfo};
use crate::util::rational::{
    inv_q, mul_q, q2d, rescale_q, rescale_q_rnd, Rational, Rounding, NOPTS_VALUE, TIME_BASE,
    TIME_BASE_Q,
};

/// With `copy_ts`, a pre-wrap hypothesis must land this many times closer to
/// the predicted DTS than the raw value before correction is re-enabled.
/// Empirical.
pub(crate) const WRAP_HEURISTIC_RATIO: i64 = 10;

/// Packets landing this far (0.1s) behind the last DTS count as a discontinuity.
const DTS_BACKWARD_GUARD: i64 = TIME_BASE as i64 / 10;

/// Timing state of one elementary stream, owned by the demuxer thread.
#[derive(Debug, Clone)]
pub(crate) struct DemuxStreamState {
    pub(crate) media_type: MediaType,
    pub(crate) stream_index: usize,

    pub(crate) wrap_correction_done: bool,
    pub(crate) saw_first_ts: bool,
    ///< dts of the first packet read for this stream (in TIME_BASE units)
    pub(crate) first_dts: i64,

    pub(crate) next_dts: i64,
    ///< dts of the last packet read for this stream (in TIME_BASE units)
    pub(crate) dts: i64,

    last_pkt_dts: i64,
    last_dts_delta: i64,
}

impl DemuxStreamState {
    fn new(stream: &StreamInfo) -> Self {
        Self {
            media_type: stream.media_type(),
            stream_index: stream.index(),
            wrap_correction_done: false,
            saw_first_ts: false,
            first_dts: NOPTS_VALUE,
            next_dts: NOPTS_VALUE,
            dts: 0,
            last_pkt_dts: NOPTS_VALUE,
            last_dts_delta: 0,
        }
    }

    /// Forgets the prediction, as after a seek. Wrap status is kept.
    fn reset_prediction(&mut self) {
        self.saw_first_ts = false;
        self.first_dts = NOPTS_VALUE;
        self.next_dts = NOPTS_VALUE;
        self.dts = 0;
        self.last_pkt_dts = NOPTS_VALUE;
        self.last_dts_delta = 0;
    }
}

/// Cross-stream discontinuity state, in TIME_BASE units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiscontinuityState {
    /// Extra timestamp offset added by discontinuity handling.
    pub(crate) ts_offset_discont: i64,
    /// Latest corrected dts seen on any audio/video stream.
    pub(crate) last_ts: i64,
}

impl Default for DiscontinuityState {
    fn default() -> Self {
        Self {
            ts_offset_discont: 0,
            last_ts: NOPTS_VALUE,
        }
    }
}

/// Container-level inputs to the correction stages.
#[derive(Debug, Clone)]
pub(crate) struct TsFixupParams {
    /// Container start time in TIME_BASE units.
    pub(crate) start_time: i64,
    pub(crate) ts_discont: bool,
    pub(crate) copy_ts: bool,
    pub(crate) dts_delta_threshold: i64,
    pub(crate) dts_error_threshold: i64,
    pub(crate) ts_offset: i64,
    pub(crate) ts_scale: f64,
    pub(crate) framerate: Rational,
}

impl TsFixupParams {
    pub(crate) fn new(info: &ContainerInfo, options: &DemuxOptions) -> Self {
        Self {
            start_time: info.start_time,
            ts_discont: info.ts_discont,
            copy_ts: options.copy_ts,
            dts_delta_threshold: seconds_to_time_base(options.dts_delta_threshold),
            dts_error_threshold: seconds_to_time_base(options.dts_error_threshold),
            ts_offset: options.ts_offset_us,
            ts_scale: options.ts_scale,
            framerate: options.framerate,
        }
    }
}

fn seconds_to_time_base(seconds: f64) -> i64 {
    (seconds * TIME_BASE as f64) as i64
}

/// Wrap correction, offset/scale, discontinuity handling and DTS prediction
/// for every packet, in that order. Each stage relies on the corrections of
/// the previous one.
pub(crate) struct TsFixup {
    params: TsFixupParams,
    streams: Vec<StreamInfo>,
    states: Vec<Option<DemuxStreamState>>,
    discont: DiscontinuityState,
}

impl TsFixup {
    pub(crate) fn new(info: &ContainerInfo, options: &DemuxOptions) -> Self {
        Self {
            params: TsFixupParams::new(info, options),
            streams: info.streams.clone(),
            states: vec![None; info.streams.len()],
            discont: DiscontinuityState::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn stream_state(&self, stream_index: usize) -> Option<&DemuxStreamState> {
        self.states.get(stream_index).and_then(Option::as_ref)
    }

    #[cfg(test)]
    pub(crate) fn discontinuity(&self) -> &DiscontinuityState {
        &self.discont
    }

    pub(crate) fn stream_states(&self) -> impl Iterator<Item = &DemuxStreamState> {
        self.states.iter().flatten()
    }

    /// Drops every per-stream prediction; the accumulated offset survives.
    pub(crate) fn reset_predictions(&mut self) {
        for state in self.states.iter_mut().flatten() {
            state.reset_prediction();
        }
        self.discont.last_ts = NOPTS_VALUE;
    }

    /// Corrects `pkt` in place. Packets of unknown streams are left untouched.
    pub(crate) fn process(&mut self, pkt: &mut Packet) {
        let Some(stream) = self.streams.get(pkt.stream_index) else {
            return;
        };
        let Some(slot) = self.states.get_mut(pkt.stream_index) else {
            return;
        };
        let ds = slot.get_or_insert_with(|| DemuxStreamState::new(stream));

        pkt.time_base = stream.time_base();

        wrap_correction(ds, stream, self.params.start_time, pkt);

        let ts_offset = rescale_q(self.params.ts_offset, TIME_BASE_Q, pkt.time_base);
        pkt.dts = offset_ts(pkt.dts, ts_offset);
        pkt.pts = offset_ts(pkt.pts, ts_offset);

        if self.params.ts_scale != 1.0 {
            pkt.pts = scale_ts(pkt.pts, self.params.ts_scale);
            pkt.dts = scale_ts(pkt.dts, self.params.ts_scale);
        }

        // detect and try to correct for timestamp discontinuities
        ts_discontinuity_process(&mut self.discont, ds, stream, &self.params, pkt);

        // update estimated/predicted dts
        ist_dts_update(ds, stream, self.params.framerate, pkt);
    }
}

/// Multiplies a timestamp by `ts_scale`, truncating toward zero.
/// Sentinels pass through.
fn scale_ts(ts: i64, ts_scale: f64) -> i64 {
    if ts == NOPTS_VALUE || ts_scale == 1.0 {
        return ts;
    }
    ((ts as f64 * ts_scale) as i64).max(NOPTS_VALUE + 1)
}

/// Adds `delta` to `ts`, saturating short of the sentinel. A sentinel on
/// either side leaves `ts` unchanged.
fn offset_ts(ts: i64, delta: i64) -> i64 {
    if ts == NOPTS_VALUE || delta == NOPTS_VALUE {
        return ts;
    }
    ts.saturating_add(delta).max(NOPTS_VALUE + 1)
}

/// Undoes timestamp wrap-around for streams with fewer than 64 timestamp bits.
///
/// Runs until a packet is found below the wrap threshold; a packet that still
/// needed correction keeps the stream eligible for the next one.
pub(crate) fn wrap_correction(
    ds: &mut DemuxStreamState,
    stream: &StreamInfo,
    start_time: i64,
    pkt: &mut Packet,
) {
    let wrap_bits = stream.pts_wrap_bits();
    if ds.wrap_correction_done || start_time == NOPTS_VALUE || wrap_bits >= 64 || wrap_bits == 0 {
        return;
    }

    let stime = rescale_q(start_time, TIME_BASE_Q, pkt.time_base);
    let wrap = (1u64 << wrap_bits) as i64;
    ds.wrap_correction_done = true;

    if stime == NOPTS_VALUE || stime.wrapping_add(wrap) <= stime {
        return;
    }
    let threshold = stime.saturating_add(1i64 << (wrap_bits - 1));

    if pkt.dts != NOPTS_VALUE && pkt.dts > threshold {
        if let Some(dts) = pkt.dts.checked_sub(wrap) {
            pkt.dts = dts;
            ds.wrap_correction_done = false;
        }
    }
    if pkt.pts != NOPTS_VALUE && pkt.pts > threshold {
        if let Some(pts) = pkt.pts.checked_sub(wrap) {
            pkt.pts = pts;
            ds.wrap_correction_done = false;
        }
    }
}

/// Applies the accumulated discontinuity offset, then looks for new jumps on
/// audio and video streams.
pub(crate) fn ts_discontinuity_process(
    discont: &mut DiscontinuityState,
    ds: &DemuxStreamState,
    stream: &StreamInfo,
    params: &TsFixupParams,
    pkt: &mut Packet,
) {
    let offset = rescale_q(discont.ts_offset_discont, TIME_BASE_Q, pkt.time_base);

    // apply previously-detected timestamp-discontinuity offset
    // (to all streams, not just audio/video)
    pkt.dts = offset_ts(pkt.dts, offset);
    pkt.pts = offset_ts(pkt.pts, offset);

    // detect timestamp discontinuities for audio/video
    if matches!(ds.media_type, MediaType::Video | MediaType::Audio) && pkt.dts != NOPTS_VALUE {
        ts_discontinuity_detect(discont, ds, stream, params, pkt);
    }
}

fn shift_by(pkt: &mut Packet, delta: i64) {
    let shift = rescale_q(delta, TIME_BASE_Q, pkt.time_base);
    if shift == NOPTS_VALUE {
        return;
    }
    pkt.dts = offset_ts(pkt.dts, shift.saturating_neg());
    pkt.pts = offset_ts(pkt.pts, shift.saturating_neg());
}

/// Distance between two microsecond timestamps, saturating.
fn ts_distance(a: i64, b: i64) -> i64 {
    a.saturating_sub(b).saturating_abs()
}

pub(crate) fn ts_discontinuity_detect(
    discont: &mut DiscontinuityState,
    ds: &DemuxStreamState,
    stream: &StreamInfo,
    params: &TsFixupParams,
    pkt: &mut Packet,
) {
    let fmt_is_discont = params.ts_discont;
    let wrap_bits = stream.pts_wrap_bits();

    let mut disable_discontinuity_correction = params.copy_ts;
    let pkt_dts = rescale_q_rnd(pkt.dts, pkt.time_base, TIME_BASE_Q, Rounding::NearInf, true);

    // out of range in TIME_BASE: nothing to compare against
    if pkt_dts == NOPTS_VALUE {
        discont.last_ts = NOPTS_VALUE;
        return;
    }

    if params.copy_ts && ds.next_dts != NOPTS_VALUE && fmt_is_discont && wrap_bits < 60 {
        let wrap_dts = pkt
            .dts
            .checked_add(1i64 << wrap_bits)
            .map(|dts| rescale_q_rnd(dts, pkt.time_base, TIME_BASE_Q, Rounding::NearInf, true))
            .unwrap_or(NOPTS_VALUE);
        if wrap_dts != NOPTS_VALUE
            && ts_distance(wrap_dts, ds.next_dts)
                < ts_distance(pkt_dts, ds.next_dts) / WRAP_HEURISTIC_RATIO
        {
            disable_discontinuity_correction = false;
        }
    }

    if ds.next_dts != NOPTS_VALUE && !disable_discontinuity_correction {
        let mut delta = pkt_dts.saturating_sub(ds.next_dts);
        if fmt_is_discont {
            if delta.saturating_abs() > params.dts_delta_threshold
                || pkt_dts.saturating_add(DTS_BACKWARD_GUARD) < ds.dts
            {
                discont.ts_offset_discont = discont.ts_offset_discont.saturating_sub(delta);
                warn!(
                    "timestamp discontinuity (stream id={}): {}, new offset= {}",
                    ds.stream_index, delta, discont.ts_offset_discont
                );
                shift_by(pkt, delta);
            }
        } else {
            if delta.saturating_abs() > params.dts_error_threshold {
                warn!(
                    "DTS {}, next:{} st:{} invalid dropping",
                    pkt.dts, ds.next_dts, pkt.stream_index
                );
                pkt.dts = NOPTS_VALUE;
            }
            if pkt.pts != NOPTS_VALUE {
                let pkt_pts = rescale_q(pkt.pts, pkt.time_base, TIME_BASE_Q);
                delta = pkt_pts.saturating_sub(ds.next_dts);
                if pkt_pts == NOPTS_VALUE || delta.saturating_abs() > params.dts_error_threshold {
                    warn!(
                        "PTS {}, next:{} invalid dropping st:{}",
                        pkt.pts, ds.next_dts, pkt.stream_index
                    );
                    pkt.pts = NOPTS_VALUE;
                }
            }
        }
    } else if ds.next_dts == NOPTS_VALUE
        && !params.copy_ts
        && fmt_is_discont
        && discont.last_ts != NOPTS_VALUE
    {
        let delta = pkt_dts.saturating_sub(discont.last_ts);
        if delta.saturating_abs() > params.dts_delta_threshold {
            discont.ts_offset_discont = discont.ts_offset_discont.saturating_sub(delta);
            debug!(
                "Inter stream timestamp discontinuity {}, new offset= {}",
                delta, discont.ts_offset_discont
            );
            shift_by(pkt, delta);
        }
    }

    discont.last_ts = rescale_q_rnd(pkt.dts, pkt.time_base, TIME_BASE_Q, Rounding::NearInf, true);
}

/// Updates the predicted dts of the packet's stream.
///
/// Timestamps that do not fit in TIME_BASE are treated as missing.
pub(crate) fn ist_dts_update(
    ds: &mut DemuxStreamState,
    stream: &StreamInfo,
    framerate: Rational,
    pkt: &Packet,
) {
    let pkt_dts = if pkt.dts != NOPTS_VALUE {
        rescale_q(pkt.dts, pkt.time_base, TIME_BASE_Q)
    } else {
        NOPTS_VALUE
    };

    if !ds.saw_first_ts {
        if pkt_dts != NOPTS_VALUE {
            ds.dts = pkt_dts;
        } else {
            // Reordering codecs start one delay ahead of the first pts.
            ds.dts = match stream {
                StreamInfo::Video { avg_frame_rate, video_delay, .. }
                    if avg_frame_rate.num != 0 && avg_frame_rate.den != 0 =>
                {
                    ((-*video_delay as i64 * TIME_BASE as i64) as f64 / q2d(*avg_frame_rate))
                        as i64
                }
                _ => 0,
            };
            if pkt.pts != NOPTS_VALUE {
                ds.dts = offset_ts(ds.dts, rescale_q(pkt.pts, pkt.time_base, TIME_BASE_Q));
            }
        }
        ds.first_dts = ds.dts;
        ds.saw_first_ts = true;
    }

    if ds.next_dts == NOPTS_VALUE {
        ds.next_dts = ds.dts;
    }

    if pkt_dts != NOPTS_VALUE {
        if ds.last_pkt_dts != NOPTS_VALUE && pkt_dts > ds.last_pkt_dts {
            ds.last_dts_delta = pkt_dts.saturating_sub(ds.last_pkt_dts);
        }
        ds.last_pkt_dts = pkt_dts;
        ds.dts = pkt_dts;
        ds.next_dts = ds.dts;
    }

    ds.dts = ds.next_dts;
    match stream {
        StreamInfo::Audio { sample_rate, frame_size, .. } => {
            if *sample_rate > 0 && *frame_size > 0 {
                let frame_duration = (TIME_BASE as i64 * *frame_size as i64) / *sample_rate as i64;
                ds.next_dts = offset_ts(ds.next_dts, frame_duration);
            } else {
                let duration = rescale_q(pkt.duration, pkt.time_base, TIME_BASE_Q);
                ds.next_dts = offset_ts(ds.next_dts, duration);
            }
        }
        StreamInfo::Video { framerate: codec_framerate, .. } => {
            if framerate.num != 0 {
                if ds.next_dts != NOPTS_VALUE {
                    let frame_tb = inv_q(framerate);
                    let next_dts = rescale_q(ds.next_dts, TIME_BASE_Q, frame_tb);
                    let next_dts = if next_dts != NOPTS_VALUE {
                        rescale_q(next_dts.saturating_add(1), frame_tb, TIME_BASE_Q)
                    } else {
                        NOPTS_VALUE
                    };
                    if next_dts != NOPTS_VALUE {
                        ds.next_dts = next_dts;
                    }
                }
            } else if pkt.duration != 0 {
                let duration = rescale_q(pkt.duration, pkt.time_base, TIME_BASE_Q);
                ds.next_dts = offset_ts(ds.next_dts, duration);
            } else if codec_framerate.num != 0 && codec_framerate.den != 0 {
                // two fields per coded frame
                let field_rate = mul_q(*codec_framerate, Rational::new(2, 1));
                ds.next_dts = offset_ts(ds.next_dts, rescale_q(2, inv_q(field_rate), TIME_BASE_Q));
            } else if ds.last_dts_delta > 0 {
                ds.next_dts = offset_ts(ds.next_dts, ds.last_dts_delta);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPEG_TB: Rational = Rational::new(1, 90000);
    const WRAP_33: i64 = 1 << 33;

    fn ts_container(streams: Vec<StreamInfo>) -> ContainerInfo {
        ContainerInfo::new("mpegts", streams).with_ts_discont(true)
    }

    fn mp4_container(streams: Vec<StreamInfo>) -> ContainerInfo {
        ContainerInfo::new("mov,mp4", streams)
    }

    fn video_packet(dts: i64, duration: i64) -> Packet {
        Packet::new(0, vec![0u8; 4]).with_ts(dts).with_duration(duration)
    }

    fn run(fixup: &mut TsFixup, packets: impl IntoIterator<Item = Packet>) -> Vec<Packet> {
        packets
            .into_iter()
            .map(|mut pkt| {
                fixup.process(&mut pkt);
                pkt
            })
            .collect()
    }

    fn wrap_fixture() -> (DemuxStreamState, StreamInfo) {
        let stream = StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33);
        (DemuxStreamState::new(&stream), stream)
    }

    fn wrap_packet(dts: i64, pts: i64) -> Packet {
        let mut pkt = Packet::new(0, vec![0u8]).with_dts(Some(dts)).with_pts(Some(pts));
        pkt.time_base = MPEG_TB;
        pkt
    }

    // --- wrap correction ---

    #[test]
    fn wrap_crossing_once_stays_monotonic() {
        let (mut ds, stream) = wrap_fixture();
        let raw = [WRAP_33 - 3000, WRAP_33 - 1500, 0, 1500, 3000];

        let corrected: Vec<i64> = raw
            .iter()
            .map(|&ts| {
                let mut pkt = wrap_packet(ts, ts);
                wrap_correction(&mut ds, &stream, 0, &mut pkt);
                assert_eq!(pkt.dts, pkt.pts);
                pkt.dts
            })
            .collect();

        assert_eq!(corrected, vec![-3000, -1500, 0, 1500, 3000]);
        assert!(corrected.windows(2).all(|w| w[0] < w[1]));
        assert!(ds.wrap_correction_done);
    }

    #[test]
    fn wrap_crossing_once_through_full_pipeline() {
        let stream = StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33);
        let info = mp4_container(vec![stream]).with_start_time(0);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());

        let raw = [WRAP_33 - 3000, WRAP_33 - 1500, 0, 1500, 3000];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 1500)));
        let dts: Vec<i64> = out.iter().map(|p| p.dts).collect();

        assert_eq!(dts, vec![-3000, -1500, 0, 1500, 3000]);
        assert_eq!(fixup.discontinuity().ts_offset_discont, 0);
    }

    #[test]
    fn wrap_correction_done_is_sticky() {
        let (mut ds, stream) = wrap_fixture();

        let mut first = wrap_packet(100, 100);
        wrap_correction(&mut ds, &stream, 0, &mut first);
        assert!(ds.wrap_correction_done);

        // looks like it crosses the threshold, but the stream is already settled
        let mut second = wrap_packet(WRAP_33 - 10, WRAP_33 - 10);
        wrap_correction(&mut ds, &stream, 0, &mut second);
        assert_eq!(second.dts, WRAP_33 - 10);
        assert_eq!(second.pts, WRAP_33 - 10);
    }

    #[test]
    fn wrap_pts_and_dts_are_independent() {
        let (mut ds, stream) = wrap_fixture();

        let mut pkt = wrap_packet(100, WRAP_33 - 100);
        wrap_correction(&mut ds, &stream, 0, &mut pkt);

        assert_eq!(pkt.dts, 100);
        assert_eq!(pkt.pts, -100);
        // pts still needed correcting, so the next packet is checked again
        assert!(!ds.wrap_correction_done);
    }

    #[test]
    fn wrap_skipped_without_start_time_or_for_wide_timestamps() {
        let (mut ds, stream) = wrap_fixture();
        let mut pkt = wrap_packet(WRAP_33 - 1, WRAP_33 - 1);
        wrap_correction(&mut ds, &stream, NOPTS_VALUE, &mut pkt);
        assert_eq!(pkt.dts, WRAP_33 - 1);
        assert!(!ds.wrap_correction_done);

        let wide = StreamInfo::video(0, MPEG_TB);
        let mut ds = DemuxStreamState::new(&wide);
        let mut pkt = wrap_packet(i64::MAX - 1, i64::MAX - 1);
        wrap_correction(&mut ds, &wide, 0, &mut pkt);
        assert_eq!(pkt.dts, i64::MAX - 1);
    }

    #[test]
    fn wrap_never_touches_sentinels() {
        let (mut ds, stream) = wrap_fixture();
        let mut pkt = Packet::new(0, vec![0u8]);
        pkt.time_base = MPEG_TB;
        wrap_correction(&mut ds, &stream, 0, &mut pkt);
        assert_eq!(pkt.dts, NOPTS_VALUE);
        assert_eq!(pkt.pts, NOPTS_VALUE);
        assert!(ds.wrap_correction_done);
    }

    // --- discontinuity handling ---

    #[test]
    fn discontinuity_offset_is_applied_and_kept() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());
        let jump = 50 * 90000;

        let raw = [0, 3600, 7200, 10800 + jump, 14400 + jump, 18000 + jump];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));

        assert_eq!(fixup.discontinuity().ts_offset_discont, -50 * TIME_BASE as i64);
        let offset = rescale_q(fixup.discontinuity().ts_offset_discont, TIME_BASE_Q, MPEG_TB);
        for (pkt, raw) in out.iter().zip(raw).skip(3) {
            assert_eq!(pkt.dts - raw, offset);
            assert_eq!(pkt.pts - raw, offset);
        }
        let dts: Vec<i64> = out.iter().map(|p| p.dts).collect();
        assert_eq!(dts, vec![0, 3600, 7200, 10800, 14400, 18000]);
    }

    #[test]
    fn discontinuity_backward_jump_beyond_guard() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());

        // 1 second backwards: well under the 10s threshold but behind the last dts
        let raw = [90000, 93600, 97200, 97200 - 90000];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));

        assert_eq!(out[3].dts, 100800);
        assert!(fixup.discontinuity().ts_offset_discont > 0);
    }

    #[test]
    fn discontinuity_small_jitter_is_ignored() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());

        let raw = [0, 3600, 9000, 10800];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));
        let dts: Vec<i64> = out.iter().map(|p| p.dts).collect();

        assert_eq!(dts, raw.to_vec());
        assert_eq!(fixup.discontinuity().ts_offset_discont, 0);
    }

    #[test]
    fn continuous_format_invalidates_dts() {
        let info = mp4_container(vec![StreamInfo::video(0, MPEG_TB)]);
        let options = DemuxOptions::new().set_dts_error_threshold(100.0);
        let mut fixup = TsFixup::new(&info, &options);

        let raw = [0, 3600, 7200 + 200 * 90000];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));

        assert_eq!(out[2].dts(), None);
        assert_eq!(out[2].pts(), None);
        assert_eq!(fixup.discontinuity().ts_offset_discont, 0);
        assert_eq!(fixup.discontinuity().last_ts, NOPTS_VALUE);
    }

    #[test]
    fn continuous_format_checks_pts_on_its_own() {
        let info = mp4_container(vec![StreamInfo::video(0, MPEG_TB)]);
        let options = DemuxOptions::new().set_dts_error_threshold(100.0);
        let mut fixup = TsFixup::new(&info, &options);

        let mut pkts = vec![video_packet(0, 3600), video_packet(3600, 3600)];
        pkts.push(
            Packet::new(0, vec![0u8])
                .with_dts(Some(7200))
                .with_pts(Some(7200 + 200 * 90000))
                .with_duration(3600),
        );
        let out = run(&mut fixup, pkts);

        assert_eq!(out[2].dts(), Some(7200));
        assert_eq!(out[2].pts(), None);
    }

    #[test]
    fn continuous_format_default_threshold_tolerates_large_jumps() {
        let info = mp4_container(vec![StreamInfo::video(0, MPEG_TB)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());

        let raw = [0, 3600, 7200 + 3600 * 90000];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));
        assert_eq!(out[2].dts(), Some(7200 + 3600 * 90000));
    }

    #[test]
    fn first_packet_of_stream_is_judged_against_other_streams() {
        let audio_tb = MPEG_TB;
        let info = ts_container(vec![
            StreamInfo::video(0, MPEG_TB),
            StreamInfo::audio(1, audio_tb, 48000, 1024),
        ]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());

        let mut pkts = vec![video_packet(0, 3600), video_packet(3600, 3600)];
        pkts.push(Packet::new(1, vec![0u8]).with_ts(3600 + 20 * 90000));
        let out = run(&mut fixup, pkts);

        assert_eq!(out[2].dts, 3600);
        assert_eq!(fixup.discontinuity().ts_offset_discont, -20 * TIME_BASE as i64);
    }

    #[test]
    fn inter_stream_check_is_skipped_with_copy_ts() {
        let info = ts_container(vec![
            StreamInfo::video(0, MPEG_TB),
            StreamInfo::audio(1, MPEG_TB, 48000, 1024),
        ]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new().set_copy_ts(true));

        let mut pkts = vec![video_packet(0, 3600)];
        pkts.push(Packet::new(1, vec![0u8]).with_ts(20 * 90000));
        let out = run(&mut fixup, pkts);

        assert_eq!(out[1].dts, 20 * 90000);
        assert_eq!(fixup.discontinuity().ts_offset_discont, 0);
    }

    #[test]
    fn data_streams_get_offset_but_no_detection() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB), StreamInfo::data(1, MPEG_TB)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());
        let jump = 30 * 90000;

        let mut pkts: Vec<Packet> = [0, 3600, 7200 + jump]
            .iter()
            .map(|&ts| video_packet(ts, 3600))
            .collect();
        pkts.push(Packet::new(1, vec![0u8]).with_ts(9000 + jump));
        // a data packet far away never creates an offset of its own
        pkts.push(Packet::new(1, vec![0u8]).with_ts(9000 + 100 * jump));
        let out = run(&mut fixup, pkts);

        assert_eq!(out[2].dts, 7200);
        assert_eq!(out[3].dts, 9000);
        assert_eq!(out[4].dts, 9000 + 100 * jump - jump);
        assert_eq!(fixup.discontinuity().ts_offset_discont, -30 * TIME_BASE as i64);
    }

    #[test]
    fn sentinels_flow_through_every_stage() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33)])
            .with_start_time(0);
        let options = DemuxOptions::new().set_ts_offset_us(1000).set_ts_scale(2.0);
        let mut fixup = TsFixup::new(&info, &options);

        let out = run(&mut fixup, [Packet::new(0, vec![0u8]), Packet::new(0, vec![0u8])]);
        for pkt in out {
            assert_eq!(pkt.dts(), None);
            assert_eq!(pkt.pts(), None);
        }
        let ds = fixup.stream_state(0).unwrap();
        assert!(ds.saw_first_ts);
        assert_eq!(ds.first_dts, 0);
    }

    // --- copy_ts wrap heuristic ---

    #[test]
    fn wrap_heuristic_ratio_is_pinned() {
        // Empirical constant: do not re-derive.
        assert_eq!(WRAP_HEURISTIC_RATIO, 10);
    }

    #[test]
    fn copy_ts_leaves_plain_jumps_alone() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new().set_copy_ts(true));

        let raw = [0, 3600, 7200, 10800 + 50 * 90000];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));

        assert_eq!(out[3].dts, 10800 + 50 * 90000);
        assert_eq!(fixup.discontinuity().ts_offset_discont, 0);
    }

    #[test]
    fn copy_ts_corrects_when_wrap_hypothesis_fits() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new().set_copy_ts(true));

        // the raw value is 20x farther from the prediction than its pre-wrap twin
        let back = WRAP_33 * 20 / 21;
        let raw = [0, 3600, 7200, 10800 - back];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));

        assert!((out[3].dts - 10800).abs() <= 1, "dts={}", out[3].dts);
        assert!(fixup.discontinuity().ts_offset_discont > 0);
    }

    #[test]
    fn copy_ts_keeps_disabled_when_wrap_hypothesis_is_not_close_enough() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new().set_copy_ts(true));

        // pre-wrap twin only 5x closer than the raw value
        let back = WRAP_33 * 5 / 6;
        let raw = [0, 3600, 7200, 10800 - back];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));

        assert_eq!(out[3].dts, 10800 - back);
        assert_eq!(fixup.discontinuity().ts_offset_discont, 0);
    }

    #[test]
    fn copy_ts_wrap_at_first_boundary() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new().set_copy_ts(true));

        let raw = [WRAP_33 - 7200, WRAP_33 - 3600, 0, 3600];
        let out = run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));
        let dts: Vec<i64> = out.iter().map(|p| p.dts).collect();

        assert!((dts[2] - WRAP_33).abs() <= 1);
        assert!((dts[3] - (WRAP_33 + 3600)).abs() <= 1);
    }

    // --- offset and scale ---

    #[test]
    fn ts_offset_is_added_in_stream_time_base() {
        let info = mp4_container(vec![StreamInfo::video(0, MPEG_TB)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new().set_ts_offset_us(2_000_000));

        let out = run(&mut fixup, [video_packet(0, 3600)]);
        assert_eq!(out[0].dts, 180000);
        assert_eq!(out[0].pts, 180000);
    }

    #[test]
    fn ts_scale_default_no_change() {
        assert_eq!(scale_ts(1000, 1.0), 1000);
        assert_eq!(scale_ts(-1000, 1.0), -1000);
    }

    #[test]
    fn ts_scale_truncates_toward_zero() {
        assert_eq!(scale_ts(1001, 0.5), 500);
        assert_eq!(scale_ts(-1001, 0.5), -500);
        assert_eq!(scale_ts(101, 1.5), 151);
        assert_eq!(scale_ts(-101, 1.5), -151);
    }

    #[test]
    fn ts_scale_preserves_nopts() {
        assert_eq!(scale_ts(NOPTS_VALUE, 2.0), NOPTS_VALUE);
        assert_eq!(scale_ts(NOPTS_VALUE, 0.5), NOPTS_VALUE);
    }

    #[test]
    fn ts_scale_saturates_on_overflow() {
        assert_eq!(scale_ts(i64::MAX, 2.0), i64::MAX);
        assert_eq!(scale_ts(i64::MAX / 2, 3.0), i64::MAX);
    }

    // --- next dts prediction ---

    fn predict(stream: &StreamInfo, framerate: Rational, pkts: &[Packet]) -> DemuxStreamState {
        let mut ds = DemuxStreamState::new(stream);
        for pkt in pkts {
            let mut pkt = pkt.clone();
            pkt.time_base = stream.time_base();
            ist_dts_update(&mut ds, stream, framerate, &pkt);
        }
        ds
    }

    fn no_rate() -> Rational {
        Rational::new(0, 0)
    }

    #[test]
    fn predict_audio_from_frame_size() {
        let stream = StreamInfo::audio(0, Rational::new(1, 48000), 48000, 1024);
        let ds = predict(&stream, no_rate(), &[Packet::new(0, vec![0u8]).with_ts(0)]);
        assert_eq!(ds.dts, 0);
        assert_eq!(ds.next_dts, 21333);
    }

    #[test]
    fn predict_audio_from_duration_without_frame_size() {
        let stream = StreamInfo::audio(0, Rational::new(1, 44100), 44100, 0);
        let pkt = Packet::new(0, vec![0u8]).with_ts(44100).with_duration(1152);
        let ds = predict(&stream, no_rate(), &[pkt]);
        assert_eq!(ds.dts, 1_000_000);
        assert_eq!(ds.next_dts, 1_000_000 + 26122);
    }

    #[test]
    fn predict_video_from_packet_duration() {
        let stream = StreamInfo::video(0, MPEG_TB);
        let ds = predict(&stream, no_rate(), &[video_packet(90000, 3600)]);
        assert_eq!(ds.first_dts, 1_000_000);
        assert_eq!(ds.next_dts, 1_040_000);
    }

    #[test]
    fn predict_video_forced_framerate_25fps() {
        let stream = StreamInfo::video(0, MPEG_TB);
        let ds = predict(&stream, Rational::new(25, 1), &[video_packet(0, 0)]);
        assert_eq!(ds.next_dts, 40000);
    }

    #[test]
    fn predict_video_forced_framerate_24000_1001() {
        let stream = StreamInfo::video(0, MPEG_TB);
        let ds = predict(&stream, Rational::new(24000, 1001), &[video_packet(0, 3600)]);
        let expected_us = (1001.0 / 24000.0 * TIME_BASE as f64) as i64;
        assert!((ds.next_dts - expected_us).abs() <= 1, "next={}", ds.next_dts);
    }

    #[test]
    fn predict_video_forced_framerate_consecutive_frames() {
        let stream = StreamInfo::video(0, MPEG_TB);
        let fr = Rational::new(30, 1);
        let ds = predict(&stream, fr, &[video_packet(0, 0), video_packet(3000, 0), video_packet(6000, 0)]);
        let frame_dur = TIME_BASE as i64 / 30;
        assert!((ds.next_dts - 3 * frame_dur).abs() <= 3, "next={}", ds.next_dts);
    }

    #[test]
    fn predict_video_from_codec_framerate() {
        let stream = StreamInfo::video(0, MPEG_TB)
            .with_frame_rates(Rational::new(0, 1), Rational::new(25, 1));
        let ds = predict(&stream, no_rate(), &[video_packet(0, 0)]);
        assert_eq!(ds.next_dts, 40000);
    }

    #[test]
    fn predict_video_falls_back_to_observed_delta() {
        let stream = StreamInfo::video(0, MPEG_TB);
        let ds = predict(&stream, no_rate(), &[video_packet(0, 0)]);
        assert_eq!(ds.next_dts, 0);

        let ds = predict(&stream, no_rate(), &[video_packet(0, 0), video_packet(3000, 0)]);
        assert_eq!(ds.dts, 33333);
        assert_eq!(ds.next_dts, 66666);
    }

    #[test]
    fn predict_seeds_from_pts_with_codec_delay() {
        let stream = StreamInfo::video(0, MPEG_TB)
            .with_frame_rates(Rational::new(25, 1), Rational::new(25, 1))
            .with_video_delay(1);
        let pkt = Packet::new(0, vec![0u8]).with_pts(Some(3600)).with_duration(3600);
        let ds = predict(&stream, no_rate(), &[pkt]);
        assert_eq!(ds.first_dts, 0);
        assert_eq!(ds.dts, 0);
        assert_eq!(ds.next_dts, 40000);
    }

    #[test]
    fn predict_prefers_dts_for_first_packet() {
        let stream = StreamInfo::video(0, MPEG_TB)
            .with_frame_rates(Rational::new(25, 1), Rational::new(25, 1))
            .with_video_delay(1);
        let pkt = Packet::new(0, vec![0u8])
            .with_pts(Some(7200))
            .with_dts(Some(3600))
            .with_duration(3600);
        let ds = predict(&stream, no_rate(), &[pkt]);
        assert_eq!(ds.first_dts, 40000);
    }

    #[test]
    fn reset_predictions_keeps_offset() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());
        let raw = [0, 3600, 7200 + 60 * 90000];
        run(&mut fixup, raw.iter().map(|&ts| video_packet(ts, 3600)));
        let offset = fixup.discontinuity().ts_offset_discont;
        assert_ne!(offset, 0);

        fixup.reset_predictions();
        assert_eq!(fixup.discontinuity().ts_offset_discont, offset);
        assert_eq!(fixup.discontinuity().last_ts, NOPTS_VALUE);
        let ds = fixup.stream_state(0).unwrap();
        assert!(!ds.saw_first_ts);
        assert_eq!(ds.next_dts, NOPTS_VALUE);
        assert_eq!(fixup.stream_states().count(), 1);
    }

    // --- out-of-range timestamps ---

    #[test]
    fn dts_beyond_time_base_range_is_treated_as_missing() {
        let info = ts_container(vec![StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33)]);
        let mut fixup = TsFixup::new(&info, &DemuxOptions::new());

        let out = run(
            &mut fixup,
            [
                video_packet(1 << 60, 3600),
                video_packet(3600, 3600),
                video_packet(7200, 3600),
            ],
        );

        let dts: Vec<i64> = out.iter().map(|p| p.dts).collect();
        assert_eq!(dts, vec![1 << 60, 3600, 7200]);
        assert_eq!(fixup.discontinuity().ts_offset_discont, 0);
        assert_eq!(fixup.stream_state(0).unwrap().next_dts, 120_000);
    }

    #[test]
    fn extreme_timestamps_never_overflow() {
        let extremes = [
            0,
            i64::MAX,
            i64::MIN + 1,
            1 << 62,
            -(1 << 62),
            WRAP_33 - 1,
            1 << 60,
            3600,
        ];
        let configs = [
            DemuxOptions::new(),
            DemuxOptions::new().set_copy_ts(true),
            DemuxOptions::new().set_ts_offset_us(i64::MAX / 2),
            DemuxOptions::new().set_ts_scale(1e6),
            DemuxOptions::new().set_framerate(Rational::new(25, 1)),
        ];
        let containers = [
            ts_container(vec![
                StreamInfo::video(0, MPEG_TB).with_pts_wrap_bits(33),
                StreamInfo::audio(1, MPEG_TB, 48000, 1024),
            ])
            .with_start_time(-(1 << 40)),
            mp4_container(vec![
                StreamInfo::video(0, MPEG_TB),
                StreamInfo::audio(1, MPEG_TB, 0, 0),
            ]),
        ];

        for info in &containers {
            for options in &configs {
                let mut fixup = TsFixup::new(info, options);
                for (i, &ts) in extremes.iter().chain(extremes.iter().rev()).enumerate() {
                    let mut pkt = Packet::new(i % 2, vec![0u8])
                        .with_dts(Some(ts))
                        .with_pts(Some(ts.saturating_add(7200)))
                        .with_duration(3600);
                    fixup.process(&mut pkt);
                    assert_eq!(pkt.time_base(), MPEG_TB);
                }
            }
        }
    }
}
