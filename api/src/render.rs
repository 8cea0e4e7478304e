use vidscan_analyzer::{ScoreReport, Verdict};

const AI_COLOR: &str = "#E74C3C";
const REAL_COLOR: &str = "#27AE60";

fn headline(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::AiLikely => "Likely AI-generated video",
        Verdict::RealLikely => "Likely real footage",
    }
}

/// HTML fragment for a scoring result, suitable for dropping into a page.
pub fn score_fragment(report: &ScoreReport) -> String {
    let color = match report.verdict {
        Verdict::AiLikely => AI_COLOR,
        Verdict::RealLikely => REAL_COLOR,
    };
    format!(
        "<div style='font-family:Arial;text-align:center;padding:30px;'>\
<h2 style='color:#2C3E50;'>Video analysis result</h2>\
<div style='margin-top:20px;text-align:left;display:inline-block;'>\
<p><b>Frames examined:</b> {frames}</p>\
<hr>\
<p><b>AI likelihood:</b> {score:.2}%</p>\
<h3 style='color:{color};'>{headline}</h3>\
</div></div>",
        frames = report.total_frames_examined,
        score = report.score,
        headline = headline(report.verdict),
    )
}

/// Minimal escaping for text interpolated into HTML.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn error_fragment(message: &str) -> String {
    format!("<h3>Analysis failed: {}</h3>", escape(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(score: f64, verdict: Verdict) -> ScoreReport {
        ScoreReport {
            total_frames_examined: 90,
            sampled_frames: 3,
            detected_frames: 1,
            detection_ratio: 1.0 / 90.0,
            avg_variance: 0.2,
            score,
            verdict,
        }
    }

    #[test]
    fn ai_verdict_is_red() {
        let html = score_fragment(&report(51.67, Verdict::AiLikely));
        assert!(html.contains("<b>Frames examined:</b> 90"));
        assert!(html.contains("51.67%"));
        assert!(html.contains(AI_COLOR));
        assert!(!html.contains(REAL_COLOR));
    }

    #[test]
    fn real_verdict_is_green() {
        let html = score_fragment(&report(40.0, Verdict::RealLikely));
        assert!(html.contains("40.00%"));
        assert!(html.contains(REAL_COLOR));
    }

    #[test]
    fn error_message_is_escaped() {
        let html = error_fragment("bad <script> & stuff");
        assert_eq!(html, "<h3>Analysis failed: bad &lt;script&gt; &amp; stuff</h3>");
    }
}
