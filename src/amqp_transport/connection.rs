use crate::amqp::{AmqpEngine, AmqpError, SaslMechanismKind, TlsIoConfig};
use crate::config::{
    OptionValue, AMQP_PORT, CONTAINER_ID, INCOMING_WINDOW, OUTGOING_WINDOW,
};

/// Every handle of a live AMQP connection up to the CBS node
///
/// Fields drop in declaration order, which is the reverse of creation.
pub(crate) struct ConnectionStack<E: AmqpEngine> {
    pub(crate) cbs: E::Cbs,
    pub(crate) session: E::Session,
    pub(crate) connection: E::Connection,
    _sasl_io: E::Io,
    _sasl_mechanism: E::SaslMechanism,
    pub(crate) tls_io: E::Io,
}

impl<E: AmqpEngine> ConnectionStack<E> {
    /// Build TLS IO, SASL, connection, session and an open CBS node
    ///
    /// A failing step drops whatever was created before it, newest first.
    pub(crate) fn establish(
        engine: &mut E,
        hostname: &str,
        io_options: &[(String, OptionValue)],
        trace: bool,
    ) -> Result<Self, AmqpError> {
        let tls_interface = engine.default_tls_io_interface()?;
        let mut tls_io = engine.create_tls_io(
            &tls_interface,
            &TlsIoConfig {
                hostname,
                port: AMQP_PORT,
            },
        )?;
        for (name, value) in io_options {
            engine.set_io_option(&mut tls_io, name, value)?;
        }

        let mut sasl_mechanism = engine.create_sasl_mechanism(SaslMechanismKind::MsSbCbs)?;
        let sasl_interface = engine.sasl_client_io_interface()?;
        let mut sasl_io = engine.create_sasl_io(&sasl_interface, &mut tls_io, &mut sasl_mechanism)?;

        let mut connection = engine.create_connection(&mut sasl_io, hostname, CONTAINER_ID)?;
        if trace {
            engine.set_connection_trace(&mut connection, true)?;
        }

        let mut session = engine.create_session(&mut connection)?;
        engine.set_incoming_window(&mut session, INCOMING_WINDOW)?;
        engine.set_outgoing_window(&mut session, OUTGOING_WINDOW)?;

        let mut cbs = engine.create_cbs(&mut session)?;
        engine.open_cbs(&mut cbs)?;

        Ok(ConnectionStack {
            cbs,
            session,
            connection,
            _sasl_io: sasl_io,
            _sasl_mechanism: sasl_mechanism,
            tls_io,
        })
    }
}
