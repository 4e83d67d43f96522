use crate::listener::StatisticsSnapshot;
use std::fmt::Write;

pub struct MetricsWriter;

impl MetricsWriter {
    pub fn write(
        result: &mut String,
        subscription: &str,
        snapshot: &StatisticsSnapshot,
    ) -> std::fmt::Result {
        Self::write_counter(
            result,
            "consumer_admitted_messages",
            "Number of messages admitted for processing",
            subscription,
            snapshot.admitted,
        )?;

        Self::write_counter(
            result,
            "consumer_acknowledged_messages",
            "Number of acknowledged messages",
            subscription,
            snapshot.acknowledged,
        )?;

        Self::write_counter(
            result,
            "consumer_rejected_messages",
            "Number of messages negatively acknowledged while draining",
            subscription,
            snapshot.rejected,
        )?;

        Self::write_counter(
            result,
            "consumer_ack_fallbacks",
            "Number of failed acknowledgments resolved by a negative acknowledgment",
            subscription,
            snapshot.ack_fallbacks,
        )?;

        Self::write_counter(
            result,
            "consumer_failed_messages",
            "Number of messages whose processing failed",
            subscription,
            snapshot.failed,
        )?;

        Self::write_counter(
            result,
            "consumer_interrupted_messages",
            "Number of messages left unresolved by an interruption",
            subscription,
            snapshot.interrupted,
        )?;

        // consumer_in_flight_messages
        writeln!(
            result,
            "# HELP consumer_in_flight_messages Number of admitted messages still processing"
        )?;
        writeln!(result, "# TYPE consumer_in_flight_messages gauge")?;
        writeln!(
            result,
            "consumer_in_flight_messages {{ subscription=\"{}\" }} {}",
            subscription,
            snapshot.in_flight()
        )?;

        Ok(())
    }

    fn write_counter(
        result: &mut String,
        title: &str,
        help: &str,
        subscription: &str,
        value: u64,
    ) -> std::fmt::Result {
        writeln!(result, "# HELP {} {}", title, help)?;
        writeln!(result, "# TYPE {} counter", title)?;
        writeln!(
            result,
            "{} {{ subscription=\"{}\" }} {}",
            title, subscription, value
        )?;
        writeln!(result)
    }
}
