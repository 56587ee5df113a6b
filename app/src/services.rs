use anyhow::Result;

/// A single operation against the system, named by its request value.
pub trait Request {
    type Resp;
}

/// Read-only operations.
pub trait Queryable<Req>
where
    Req: Request,
{
    fn query(&self, req: Req) -> Result<Req::Resp>;
}

/// State-changing operations.
pub trait Commandable<Req>
where
    Req: Request,
{
    fn execute(&self, req: Req) -> Result<Req::Resp>;
}
